//! Command processor
//!
//! A command is a pure function from a read-only snapshot and an input to an
//! ordered list of [`Effect`]s. The store interprets the effects: state
//! writes are applied in order, event emissions are held back until the
//! batch settles, and nested commands run recursively inside the same batch.

use slotmap::new_key_type;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::event::EventId;
use crate::inspector::{CommandPhase, CommandRecord, InspectorRecord};
use crate::key::{Argument, Key};
use crate::query::{Query, QueryContext};
use crate::runtime::{Batch, Runtime};
use crate::state::{State, StateId};
use crate::value::{Data, SharedData, SharedValue, Value};

new_key_type! {
    /// Unique identifier for a command
    pub struct CommandId;
}

pub(crate) type EffectFn =
    dyn Fn(&mut CommandContext<'_>, &dyn Data) -> anyhow::Result<Vec<Effect>> + Send + Sync;

/// A command declared by a domain instance
pub(crate) struct CommandDef {
    pub(crate) key: Key,
    pub(crate) run: Arc<EffectFn>,
}

/// Typed handle to a command
pub struct Command<I> {
    id: CommandId,
    _marker: PhantomData<fn(I)>,
}

impl<I> Command<I> {
    pub(crate) fn from_id(id: CommandId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> CommandId {
        self.id
    }
}

impl<I: Data + Clone> Command<I> {
    /// An effect invoking this command inside the current batch
    pub fn call(self, input: I) -> Effect {
        Effect::NestedCommand(NestedCommand {
            command: self.id,
            input: Arc::new(input),
        })
    }
}

impl<I> Clone for Command<I> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<I> Copy for Command<I> {}

impl<I> std::fmt::Debug for Command<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Command").field(&self.id).finish()
    }
}

/// One step of a command's outcome
#[derive(Debug)]
pub enum Effect {
    StateWrite(StateWrite),
    EventEmission(EventEmission),
    NestedCommand(NestedCommand),
}

#[derive(Debug)]
pub struct StateWrite {
    pub(crate) state: StateId,
    pub(crate) value: SharedValue,
}

impl StateWrite {
    pub fn state(&self) -> StateId {
        self.state
    }

    pub fn value(&self) -> &dyn Value {
        &*self.value
    }
}

#[derive(Debug)]
pub struct EventEmission {
    pub(crate) event: EventId,
    pub(crate) payload: SharedData,
}

impl EventEmission {
    pub(crate) fn new(event: EventId, payload: SharedData) -> Self {
        Self { event, payload }
    }

    pub fn event(&self) -> EventId {
        self.event
    }

    pub fn payload(&self) -> &dyn Data {
        &*self.payload
    }
}

#[derive(Debug)]
pub struct NestedCommand {
    pub(crate) command: CommandId,
    pub(crate) input: SharedData,
}

impl NestedCommand {
    pub fn command(&self) -> CommandId {
        self.command
    }

    pub fn input(&self) -> &dyn Data {
        &*self.input
    }
}

/// Read-only snapshot handed to effect functions.
///
/// Reads are not tracked: commands have no dependencies of their own.
pub struct CommandContext<'rt> {
    reader: QueryContext<'rt>,
}

impl<'rt> CommandContext<'rt> {
    pub(crate) fn new(runtime: &'rt mut Runtime) -> Self {
        Self {
            reader: QueryContext::untracked(runtime),
        }
    }

    /// Read the current value of a state cell
    pub fn get<T: Clone + 'static>(&mut self, state: State<T>) -> Result<T> {
        self.reader.get(state)
    }

    /// Read the up-to-date value of a query instance
    pub fn query<A: Argument, T: Clone + 'static>(
        &mut self,
        query: Query<A, T>,
        arg: A,
    ) -> Result<T> {
        self.reader.query(query, arg)
    }
}

fn effect_failure(key: Key, err: anyhow::Error) -> StoreError {
    match err.downcast::<StoreError>() {
        Ok(err) => err,
        Err(source) => StoreError::EffectFunctionFailure { key, source },
    }
}

impl Runtime {
    /// Run a command's effect function and apply its effects to `batch`
    pub(crate) fn run_command(
        &mut self,
        id: CommandId,
        input: SharedData,
        batch: &mut Batch,
        depth: usize,
    ) -> Result<()> {
        let (key, run) = {
            let def = self
                .commands
                .get(id)
                .ok_or_else(|| StoreError::unknown(format!("{id:?}")))?;
            (def.key.clone(), Arc::clone(&def.run))
        };
        let limit = self.config.max_command_depth;
        if depth >= limit {
            return Err(StoreError::CommandDepthExceeded { key, limit });
        }

        self.record(|| {
            InspectorRecord::Command(CommandRecord {
                phase: CommandPhase::Dispatched,
                key: key.clone(),
                input: Arc::clone(&input),
            })
        });

        let result = {
            let mut ctx = CommandContext::new(self);
            run(&mut ctx, &*input)
        };
        let effects = match result
            .map_err(|err| effect_failure(key.clone(), err))
            .and_then(|effects| self.validate_effects(effects))
        {
            Ok(effects) => effects,
            Err(err) => {
                self.record(|| {
                    InspectorRecord::Command(CommandRecord {
                        phase: CommandPhase::Failed {
                            reason: err.to_string(),
                        },
                        key: key.clone(),
                        input: Arc::clone(&input),
                    })
                });
                return Err(err);
            }
        };

        let count = effects.len();
        for effect in effects {
            match effect {
                Effect::StateWrite(write) => self.write_state(write.state, write.value)?,
                Effect::EventEmission(emission) => batch.events.push(emission),
                Effect::NestedCommand(nested) => {
                    self.run_command(nested.command, nested.input, batch, depth + 1)?
                }
            }
        }

        tracing::trace!(command = %key, effects = count, "command applied");
        self.record(|| {
            InspectorRecord::Command(CommandRecord {
                phase: CommandPhase::Applied { effects: count },
                key,
                input,
            })
        });
        Ok(())
    }

    /// Every target must exist before the first effect is applied
    fn validate_effects(&self, effects: Vec<Effect>) -> Result<Vec<Effect>> {
        for effect in effects.iter() {
            let known = match effect {
                Effect::StateWrite(write) => self.states.contains_key(write.state),
                Effect::EventEmission(emission) => self.events.contains_key(emission.event),
                Effect::NestedCommand(nested) => self.commands.contains_key(nested.command),
            };
            if !known {
                return Err(StoreError::unknown(format!("{effect:?}")));
            }
        }
        Ok(effects)
    }
}
