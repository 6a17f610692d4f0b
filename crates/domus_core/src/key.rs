//! Identity and keying
//!
//! Every domain, state, query, command and event is identified by a [`Key`]
//! derived from `(kind, name, argument)`. Two keys are equal exactly when the
//! kinds and names match and the arguments are structurally equal, which is
//! what lets repeated requests resolve to the same cached instance.
//!
//! ```rust
//! use domus_core::key::{key_of, EntityKind};
//!
//! let a = key_of(EntityKind::Domain, "TodoItem", vec![("id", 1)]);
//! let b = key_of(EntityKind::Domain, "TodoItem", vec![("id", 1)]);
//! assert_eq!(a, b);
//! ```

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// The kind of entity a key refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Domain,
    State,
    Query,
    Command,
    Event,
    Extern,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Domain => "domain",
            EntityKind::State => "state",
            EntityKind::Query => "query",
            EntityKind::Command => "command",
            EntityKind::Event => "event",
            EntityKind::Extern => "extern",
        };
        f.write_str(name)
    }
}

/// A value usable as a domain or query argument.
///
/// Implemented for every `Hash + Eq + Debug + Send + Sync + 'static` type.
pub trait Argument: Any + fmt::Debug + Send + Sync {
    fn arg_any(&self) -> &dyn Any;
    fn arg_eq(&self, other: &dyn Argument) -> bool;
    fn arg_hash(&self, state: &mut dyn Hasher);
}

impl<T> Argument for T
where
    T: Any + fmt::Debug + Hash + Eq + Send + Sync,
{
    fn arg_any(&self) -> &dyn Any {
        self
    }

    fn arg_eq(&self, other: &dyn Argument) -> bool {
        other.arg_any().downcast_ref::<T>().is_some_and(|other| other == self)
    }

    fn arg_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }
}

/// A type-erased, structurally comparable argument
#[derive(Clone)]
pub struct ArgKey {
    /// Hash of the argument, seeded with its type
    hash: u64,
    value: Arc<dyn Argument>,
}

impl ArgKey {
    pub fn new<A: Argument>(arg: A) -> Self {
        let mut hasher = FxHasher::default();
        arg.arg_hash(&mut hasher);
        Self {
            hash: hasher.finish(),
            value: Arc::new(arg),
        }
    }

    /// The canonical empty argument
    pub fn unit() -> Self {
        Self::new(())
    }

    pub fn is_unit(&self) -> bool {
        self.downcast_ref::<()>().is_some()
    }

    /// Borrow the argument as its concrete type
    pub fn downcast_ref<A: 'static>(&self) -> Option<&A> {
        let value: &dyn Argument = &*self.value;
        value.arg_any().downcast_ref::<A>()
    }
}

impl PartialEq for ArgKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.value.arg_eq(&*other.value)
    }
}

impl Eq for ArgKey {}

impl Hash for ArgKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for ArgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.value, f)
    }
}

/// Stable identifier for an entity
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key {
    kind: EntityKind,
    name: Arc<str>,
    arg: ArgKey,
}

impl Key {
    pub fn new(kind: EntityKind, name: impl Into<Arc<str>>, arg: ArgKey) -> Self {
        Self {
            kind,
            name: name.into(),
            arg,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arg(&self) -> &ArgKey {
        &self.arg
    }

    /// Same kind and name, different argument
    pub(crate) fn with_arg(&self, arg: ArgKey) -> Self {
        Self {
            kind: self.kind,
            name: Arc::clone(&self.name),
            arg,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.arg.is_unit() {
            write!(f, "{}({})", self.kind, self.name)
        } else {
            write!(f, "{}({})[{:?}]", self.kind, self.name, self.arg)
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Derive the key of an entity from its kind, name and argument
pub fn key_of<A: Argument>(kind: EntityKind, name: &str, arg: A) -> Key {
    Key::new(kind, name, ArgKey::new(arg))
}
