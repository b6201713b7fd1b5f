pub mod attribute;
pub mod content;
pub mod identity;
pub mod resource;
pub mod view;

pub use attribute::{AttributeInstance, AttributeType};
pub use content::{ContentInstance, ContentType};
pub use identity::{EntityId, Identity, Kind};
pub use resource::{Relation, Resource};
pub use view::{
    FilterInstance, FilterType, SorterInstance, SorterType, ViewInstance, ViewResult, ViewType,
};
