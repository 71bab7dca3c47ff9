//! Repository traits for metadata operations.

pub mod bootstrap;
pub mod captures;
pub mod classifications;
pub mod facets;
pub mod fish;
pub mod media;
pub mod purge;
pub mod tokens;

pub use bootstrap::BootstrapRepo;
pub use captures::CaptureRepo;
pub use classifications::ClassificationRepo;
pub use facets::{FacetRepo, Facets};
pub use fish::FishRepo;
pub use media::MediaRepo;
pub use purge::{PurgeJobRepo, PurgeJobState, PurgeStats};
pub use tokens::TokenRepo;
