pub mod internal_key;
pub mod pipeline;

pub use internal_key::require_internal_key;
pub use pipeline::{
    authorize, AuditResource, CurrentUser, PipelineState, RateLimitKey, RequestContext, RoutePolicy,
};
