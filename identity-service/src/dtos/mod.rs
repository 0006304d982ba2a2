pub mod audit;
pub mod consent;
pub mod context;
pub mod oauth;
pub mod resolve;

pub use audit::{AuditListResponse, AuditQueryParams};
pub use consent::{ConsentCommand, ConsentPairPayload, ConsentRequestPayload, ConsentResponse};
pub use context::{
    AddNameRequest, AssignNameRequest, CreateContextRequest, CreateProfileRequest,
    RenameContextRequest,
};
pub use oauth::{AuthorizeQuery, TokenRequest, TokenResponse};
pub use resolve::{ResolveRequest, ResolveResponse};
