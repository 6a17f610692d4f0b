//! Type-erased values flowing through the store

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::key::Key;

/// Anything the store carries around: event payloads, command inputs.
pub trait Data: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T> Data for T
where
    T: Any + fmt::Debug + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Data that can be compared by value: state contents and query outputs.
pub trait Value: Data {
    fn dyn_eq(&self, other: &dyn Value) -> bool;
}

impl<T> Value for T
where
    T: Data + PartialEq,
{
    fn dyn_eq(&self, other: &dyn Value) -> bool {
        other.as_any().downcast_ref::<T>().is_some_and(|other| other == self)
    }
}

pub type SharedValue = Arc<dyn Value>;
pub type SharedData = Arc<dyn Data>;

pub(crate) fn value_as<T: Clone + 'static>(value: &dyn Value, key: &Key) -> Result<T> {
    value
        .as_any()
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| StoreError::TypeMismatch { key: key.clone() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dyn_eq_compares_by_value() {
        let a: SharedValue = Arc::new(vec![1, 2]);
        let b: SharedValue = Arc::new(vec![1, 2]);
        let c: SharedValue = Arc::new(vec![3]);
        assert!(a.dyn_eq(&*b));
        assert!(!a.dyn_eq(&*c));
    }

    #[test]
    fn test_dyn_eq_rejects_other_types() {
        let a: SharedValue = Arc::new(1i32);
        let b: SharedValue = Arc::new(1i64);
        assert!(!a.dyn_eq(&*b));
    }
}
