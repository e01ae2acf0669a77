use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::{ModuleResult, Next, RequestModule};
use crate::model::{ClusterResult, RequestContext};

/// Releases the body streams of replica responses that did not become the final
/// response, so a caller reading only the final response leaks nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct LeakPreventionModule;

impl RequestModule for LeakPreventionModule {
    fn name(&self) -> &str {
        "LeakPrevention"
    }

    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ModuleResult> {
        async move {
            let result = next.run(context).await?;
            let released = dispose_unselected(&result);
            if released > 0 {
                trace!(message = "Released unused response streams.", count = released);
            }
            Ok(result)
        }
        .boxed()
    }
}

fn dispose_unselected(result: &ClusterResult) -> usize {
    let kept = result.response().stream();
    result
        .replica_results()
        .iter()
        .map(|replica| replica.response())
        .filter(|response| !Arc::ptr_eq(response, result.response()))
        .filter_map(|response| response.stream())
        .filter(|stream| !kept.is_some_and(|kept| Arc::ptr_eq(kept, stream)))
        .map(|stream| stream.dispose())
        .filter(|released| *released)
        .count()
}
