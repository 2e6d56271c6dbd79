pub mod backup_code;
pub mod challenge;
pub mod group;
pub mod login_activity;
pub mod policy;
pub mod principal;
pub mod role;
pub mod tenant;

pub use backup_code::BackupCode;
pub use challenge::ChallengeRecord;
pub use group::Group;
pub use login_activity::{ClientInfo, LoginActivity, LoginStatus, UserAgentDetails};
pub use policy::{Effect, Policy, PolicyDocument, ResourceGrant, Statement};
pub use principal::{Principal, PrincipalResponse};
pub use role::Role;
pub use tenant::Tenant;
