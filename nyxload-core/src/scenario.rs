use async_trait::async_trait;

use crate::context::VuContext;
use crate::error::Result;

/// Unit of work run repeatedly by every virtual user.
///
/// One instance is shared by all VUs, so implementations keep per-iteration
/// state local and treat `self` as read-only configuration. An `Err` is
/// recorded against the run and the VU carries on with its next iteration.
#[async_trait]
pub trait Scenario: Send + Sync + 'static {
    async fn iteration(&self, ctx: &mut VuContext) -> Result<()>;
}
