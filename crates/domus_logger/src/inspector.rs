//! Tracing inspector

use domus_core::inspector::{CommandPhase, DomainPhase, QueryPhase, StatePhase};
use domus_core::{Inspector, InspectorRecord};

use crate::config::LoggerConfig;

/// Render a record as a single line, e.g.
/// `state(Counter.Count) updated v2 = 5`
pub fn describe(record: &InspectorRecord, values: bool) -> String {
    let key = record.key();
    match record {
        InspectorRecord::State(state) => {
            let phase = match state.phase {
                StatePhase::Created => "created",
                StatePhase::Updated => "updated",
                StatePhase::Destroyed => "destroyed",
            };
            if values {
                format!("{key} {phase} v{} = {:?}", state.version, state.value)
            } else {
                format!("{key} {phase} v{}", state.version)
            }
        }
        InspectorRecord::Query(query) => {
            let phase = match query.phase {
                QueryPhase::Created => "created",
                QueryPhase::Dirty => "dirty",
                QueryPhase::Clean => "clean",
                QueryPhase::Evaluated { changed: true } => "evaluated (changed)",
                QueryPhase::Evaluated { changed: false } => "evaluated (unchanged)",
                QueryPhase::Subscribed => "subscribed",
                QueryPhase::Unsubscribed => "unsubscribed",
                QueryPhase::Destroyed => "destroyed",
            };
            match (&query.value, values) {
                (Some(value), true) => format!("{key} {phase} = {value:?}"),
                _ => format!("{key} {phase}"),
            }
        }
        InspectorRecord::Domain(domain) => match domain.phase {
            DomainPhase::Created => format!("{key} created"),
            DomainPhase::Destroyed => format!("{key} destroyed"),
        },
        InspectorRecord::Event(event) => {
            if values {
                format!("{key} emitted {:?}", event.payload)
            } else {
                format!("{key} emitted")
            }
        }
        InspectorRecord::Command(command) => {
            let phase = match &command.phase {
                CommandPhase::Dispatched => "dispatched".to_string(),
                CommandPhase::Applied { effects } => format!("applied {effects} effects"),
                CommandPhase::Failed { reason } => format!("failed: {reason}"),
            };
            if values && command.phase == CommandPhase::Dispatched {
                format!("{key} {phase} with {:?}", command.input)
            } else {
                format!("{key} {phase}")
            }
        }
    }
}

/// Reports every inspector record through `tracing` at debug level
/// under the `domus` target
#[derive(Debug, Clone, Default)]
pub struct TracingInspector {
    config: LoggerConfig,
}

impl TracingInspector {
    pub fn new(config: LoggerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }
}

impl Inspector for TracingInspector {
    fn inspect(&self, record: &InspectorRecord) {
        let source = record.source();
        if !self.config.includes(source) {
            return;
        }
        tracing::debug!(
            target: "domus",
            source = %source,
            "{}",
            describe(record, self.config.values)
        );
    }
}
