pub mod error;
pub mod id;
pub mod observable;
pub mod path;
pub mod record;
pub mod value;

// Re-export commonly used types
pub use error::CoreError;
pub use id::SubscriptionId;
pub use observable::{
    ChangeKind, CollectionChange, ListChange, MapChange, Observable, ObservableList, ObservableMap,
};
pub use path::{FieldPath, PathSegment};
pub use record::{HostRecord, JsonRecord, TypedRecord};
pub use value::{decode, describe, encode, FieldKind, ValueType};
