//! Registration of components and the frozen container the machine runs.

use std::collections::HashMap;
use std::sync::Arc;

use crate::component::Component;
use crate::meta::Meta;
use crate::options::MetaOptions;

/// Mutable builder used to register components at application boot. Frozen
/// into an immutable [`Container`] with [`ContainerBuilder::build`].
#[derive(Default)]
pub struct ContainerBuilder {
    registrations: Vec<(Component, MetaOptions)>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a long-running process with the given options.
    pub fn register_process(&mut self, component: Component, options: MetaOptions) {
        self.registrations.push((component, options));
    }

    /// Registers an initializer: a component whose `run`, if any, may return
    /// cleanly before shutdown. Shorthand for a process registered with
    /// early exit allowed.
    pub fn register_initializer(&mut self, component: Component, options: MetaOptions) {
        self.register_process(component, options.early_exit(true));
    }

    /// Freezes the builder into a container.
    pub fn build(self) -> Container {
        self.build_with(MetaOptions::new())
    }

    /// Freezes the builder into a container, applying the given options as
    /// defaults for every registration. Per-registration options win field by
    /// field; health keys concatenate.
    ///
    /// Components group by priority; priorities boot in ascending order and
    /// registration order is preserved within a priority. Priority zero keeps
    /// a compatibility rule: its members boot strictly one after another,
    /// while every other priority boots as one parallel group.
    pub fn build_with(self, base: MetaOptions) -> Container {
        let mut metas: HashMap<i32, Vec<Arc<Meta>>> = HashMap::new();
        for (component, options) in self.registrations {
            let merged = MetaOptions::merge(&base, &options);
            let meta = Arc::new(Meta::new(component, merged));
            metas.entry(meta.priority()).or_default().push(meta);
        }

        let mut priorities: Vec<i32> = metas.keys().copied().collect();
        priorities.sort_unstable();

        Container { metas, priorities }
    }
}

/// Immutable container of registered components, keyed by priority.
pub struct Container {
    metas: HashMap<i32, Vec<Arc<Meta>>>,
    priorities: Vec<i32>,
}

impl Container {
    /// Every registered meta, in priority order.
    pub fn metas(&self) -> Vec<Arc<Meta>> {
        self.priorities
            .iter()
            .flat_map(|priority| self.metas[priority].iter().cloned())
            .collect()
    }

    pub(crate) fn metas_at(&self, priority: i32) -> &[Arc<Meta>] {
        self.metas
            .get(&priority)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The distinct priorities with at least one registration, ascending.
    pub fn priorities(&self) -> &[i32] {
        &self.priorities
    }

    pub(crate) fn len(&self) -> usize {
        self.metas.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::health::Health;

    #[test]
    fn priorities_sort_ascending_and_preserve_registration_order() {
        let mut builder = ContainerBuilder::new();
        builder.register_process(Component::new(), MetaOptions::new().name("late").priority(5));
        builder.register_process(Component::new(), MetaOptions::new().name("first").priority(1));
        builder.register_process(Component::new(), MetaOptions::new().name("second").priority(1));

        let container = builder.build();
        assert_eq!(container.priorities(), &[1, 5]);
        assert_eq!(container.len(), 3);

        let names: Vec<&str> = container.metas_at(1).iter().map(|m| m.name()).collect();
        assert_eq!(names, ["first", "second"]);
    }

    #[test]
    fn register_initializer_allows_early_exit() {
        let mut builder = ContainerBuilder::new();
        builder.register_initializer(Component::new(), MetaOptions::new().name("migrator"));

        let container = builder.build();
        assert!(container.metas()[0].allows_early_exit());
    }

    #[test]
    fn build_defaults_yield_to_registration_options() {
        let health = Health::new();
        let mut builder = ContainerBuilder::new();
        builder.register_process(
            Component::new(),
            MetaOptions::new()
                .name("worker")
                .priority(3)
                .health_key("worker.ready"),
        );

        let container = builder.build_with(
            MetaOptions::new()
                .priority(1)
                .health(health)
                .health_key("shared.ready")
                .init_timeout(Duration::from_secs(1)),
        );

        let meta = &container.metas()[0];
        assert_eq!(meta.priority(), 3);
        assert_eq!(meta.health_keys(), ["shared.ready", "worker.ready"]);
        assert_eq!(container.priorities(), &[3]);
    }

    #[test]
    fn unnamed_components_get_a_placeholder() {
        let mut builder = ContainerBuilder::new();
        builder.register_process(Component::new(), MetaOptions::new());

        let container = builder.build();
        assert_eq!(container.metas()[0].name(), "<unnamed>");
    }
}
