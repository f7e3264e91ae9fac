use ordermgt_core::Result;

/// Source of identifiers for orders added without one.
///
/// Generation is fallible so that exhaustible or remote generators can be
/// plugged in; a failure surfaces to the `AddOrder` caller as `INTERNAL`.
pub trait OrderIdGenerator: Send + Sync {
    fn next_id(&self) -> Result<String>;
}

/// Random UUID v4 identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl OrderIdGenerator for UuidGenerator {
    fn next_id(&self) -> Result<String> {
        Ok(uuid::Uuid::new_v4().to_string())
    }
}
