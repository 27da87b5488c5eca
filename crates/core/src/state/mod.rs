pub mod db;
pub mod repository;

pub use db::RequirementDb;
pub use repository::{RequirementRepository, StoredRequirement, StoredTestCase};
