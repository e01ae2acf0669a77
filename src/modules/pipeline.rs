use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::{BuiltInModule, ModuleResult, Next, RequestModule};
use crate::model::RequestContext;

/// What a custom module is positioned relative to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleAnchor {
    BuiltIn(BuiltInModule),
    /// A custom module, by its [`RequestModule::name`].
    Custom(String),
}

impl From<BuiltInModule> for ModuleAnchor {
    fn from(module: BuiltInModule) -> Self {
        ModuleAnchor::BuiltIn(module)
    }
}

impl From<&str> for ModuleAnchor {
    fn from(name: &str) -> Self {
        ModuleAnchor::Custom(name.to_string())
    }
}

impl fmt::Display for ModuleAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleAnchor::BuiltIn(module) => write!(f, "{module}"),
            ModuleAnchor::Custom(name) => f.write_str(name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleRelation {
    Before(ModuleAnchor),
    After(ModuleAnchor),
}

impl ModuleRelation {
    pub fn before(anchor: impl Into<ModuleAnchor>) -> Self {
        ModuleRelation::Before(anchor.into())
    }

    pub fn after(anchor: impl Into<ModuleAnchor>) -> Self {
        ModuleRelation::After(anchor.into())
    }

    pub fn anchor(&self) -> &ModuleAnchor {
        match self {
            ModuleRelation::Before(anchor) | ModuleRelation::After(anchor) => anchor,
        }
    }
}

/// An ordered, immutable chain of modules shared by every call of one client.
#[derive(Clone)]
pub struct RequestPipeline {
    modules: Arc<[Arc<dyn RequestModule>]>,
}

impl RequestPipeline {
    pub fn new(modules: Vec<Arc<dyn RequestModule>>) -> Self {
        Self {
            modules: modules.into(),
        }
    }

    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|module| module.name()).collect()
    }

    pub fn execute<'a>(&'a self, context: &'a mut RequestContext) -> BoxFuture<'a, ModuleResult> {
        Next::new(&self.modules).run(context)
    }
}

impl fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.module_names()).finish()
    }
}

/// Resolves built-in modules and relatively positioned custom modules into one order.
///
/// Built-ins keep [`BuiltInModule::DEFAULT_ORDER`]. A custom module lands right before
/// or after its anchor, and modules anchored to that custom module are placed around it
/// in turn. Relatives sharing an anchor keep their insertion order.
#[derive(Default)]
pub struct PipelineBuilder {
    built_ins: HashMap<BuiltInModule, Arc<dyn RequestModule>>,
    relatives: Vec<(ModuleRelation, Arc<dyn RequestModule>)>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_built_in(mut self, token: BuiltInModule, module: Arc<dyn RequestModule>) -> Self {
        self.built_ins.insert(token, module);
        self
    }

    pub fn with_module(mut self, relation: ModuleRelation, module: Arc<dyn RequestModule>) -> Self {
        self.relatives.push((relation, module));
        self
    }

    pub fn build(self) -> RequestPipeline {
        let mut ordered = Vec::with_capacity(self.built_ins.len() + self.relatives.len());
        let mut placed = vec![false; self.relatives.len()];

        for token in BuiltInModule::DEFAULT_ORDER {
            let module = self.built_ins.get(&token).cloned();
            self.place_around(&ModuleAnchor::BuiltIn(token), module, &mut ordered, &mut placed);
        }

        for ((relation, module), placed) in self.relatives.iter().zip(placed) {
            if !placed {
                warn!(
                    message = "Module anchored to an unknown module was left out of the pipeline.",
                    module = module.name(),
                    anchor = %relation.anchor(),
                );
            }
        }

        RequestPipeline::new(ordered)
    }

    fn place_around(
        &self,
        anchor: &ModuleAnchor,
        module: Option<Arc<dyn RequestModule>>,
        ordered: &mut Vec<Arc<dyn RequestModule>>,
        placed: &mut [bool],
    ) {
        self.place_relatives(anchor, true, ordered, placed);
        ordered.extend(module);
        self.place_relatives(anchor, false, ordered, placed);
    }

    fn place_relatives(
        &self,
        anchor: &ModuleAnchor,
        before: bool,
        ordered: &mut Vec<Arc<dyn RequestModule>>,
        placed: &mut [bool],
    ) {
        for (index, (relation, module)) in self.relatives.iter().enumerate() {
            let matches = match relation {
                ModuleRelation::Before(target) => before && target == anchor,
                ModuleRelation::After(target) => !before && target == anchor,
            };
            if placed[index] || !matches {
                continue;
            }
            // Marked before recursing so a module anchored to its own name cannot loop.
            placed[index] = true;
            let own_anchor = ModuleAnchor::Custom(module.name().to_string());
            self.place_around(&own_anchor, Some(module.clone()), ordered, placed);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;
    use parking_lot::Mutex;

    use super::*;
    use crate::model::{ClusterResultStatus, Request};
    use crate::test_utils::{StatusModule, context};

    /// Appends `>name` before and `<name` after calling next.
    struct Tracing {
        name: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
        calls: AtomicUsize,
    }

    impl Tracing {
        fn new(name: &'static str, journal: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                journal: journal.clone(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl RequestModule for Tracing {
        fn name(&self) -> &str {
            self.name
        }

        fn execute<'a>(
            &'a self,
            context: &'a mut RequestContext,
            next: Next<'a>,
        ) -> BoxFuture<'a, ModuleResult> {
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.journal.lock().push(format!(">{}", self.name));
                let result = next.run(context).await;
                self.journal.lock().push(format!("<{}", self.name));
                result
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn modules_nest_in_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let pipeline = RequestPipeline::new(vec![
            Tracing::new("outer", &journal),
            Tracing::new("inner", &journal),
            Arc::new(StatusModule::new(ClusterResultStatus::Success)),
        ]);

        let mut context = context(Request::get("/".parse().unwrap()));
        let result = pipeline.execute(&mut context).await.unwrap();

        assert_eq!(result.status(), ClusterResultStatus::Success);
        assert_eq!(*journal.lock(), [">outer", ">inner", "<inner", "<outer"]);
    }

    #[tokio::test]
    async fn canceled_call_invokes_no_module() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let first = Tracing::new("first", &journal);
        let terminal = Arc::new(StatusModule::new(ClusterResultStatus::Success));
        let pipeline = RequestPipeline::new(vec![first.clone(), terminal.clone()]);

        let mut context = context(Request::get("/".parse().unwrap()));
        context.cancellation().cancel();
        let result = pipeline.execute(&mut context).await.unwrap();

        assert_eq!(result.status(), ClusterResultStatus::Canceled);
        assert_eq!(first.calls.load(Ordering::SeqCst), 0);
        assert_eq!(terminal.calls(), 0);
    }

    #[test]
    fn canceled_call_resolves_on_first_poll() {
        let pipeline = RequestPipeline::new(vec![Arc::new(StatusModule::new(
            ClusterResultStatus::Success,
        ))]);
        let mut context = context(Request::get("/".parse().unwrap()));
        context.cancellation().cancel();

        let mut call = tokio_test::task::spawn(pipeline.execute(&mut context));
        let result = tokio_test::assert_ready_ok!(call.poll());
        assert_eq!(result.status(), ClusterResultStatus::Canceled);
    }

    #[tokio::test]
    async fn pipeline_without_terminal_module_fails() {
        let pipeline = RequestPipeline::new(Vec::new());
        let mut context = context(Request::get("/".parse().unwrap()));
        let error = pipeline.execute(&mut context).await.unwrap_err();
        assert!(matches!(error, crate::ClusterError::PipelineExhausted));
    }

    #[test]
    fn builder_keeps_default_order_and_resolves_relatives() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PipelineBuilder::new()
            .with_built_in(
                BuiltInModule::RequestExecution,
                Tracing::new("execution", &journal),
            )
            .with_built_in(BuiltInModule::Logging, Tracing::new("logging", &journal))
            .with_built_in(BuiltInModule::RequestRetry, Tracing::new("retry", &journal))
            .with_module(
                ModuleRelation::after("custom"),
                Tracing::new("after-custom", &journal),
            )
            .with_module(
                ModuleRelation::before(BuiltInModule::RequestRetry),
                Tracing::new("custom", &journal),
            )
            .with_module(
                ModuleRelation::before("custom"),
                Tracing::new("before-custom", &journal),
            )
            .with_module(
                ModuleRelation::after(BuiltInModule::Logging),
                Tracing::new("after-logging", &journal),
            )
            .with_module(ModuleRelation::before("missing"), Tracing::new("orphan", &journal))
            .build();

        assert_eq!(
            pipeline.module_names(),
            [
                "logging",
                "after-logging",
                "before-custom",
                "custom",
                "after-custom",
                "retry",
                "execution",
            ]
        );
    }
}
