//! Switch module
//!
//! A single selectable value with a `switch_to` command and a `Switched`
//! event carrying both the previous and the new value.

use domus_core::{Command, DomainBuilder, Event, Query, State, Value};

/// Payload of a switch's `Switched` event
#[derive(Clone, Debug, PartialEq)]
pub struct Switched<T> {
    pub previous: T,
    pub current: T,
}

/// Entities declared by [`switch_module`]
pub struct SwitchModule<T> {
    pub state: State<T>,
    pub current: Query<(), T>,
    pub switch_to: Command<T>,
    pub reset: Command<()>,
    pub switched: Event<Switched<T>>,
}

impl<T> Clone for SwitchModule<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SwitchModule<T> {}

impl<T> std::fmt::Debug for SwitchModule<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchModule")
            .field("state", &self.state)
            .field("current", &self.current)
            .finish()
    }
}

/// Declare a switch named `name` inside the domain being built
pub fn switch_module<T>(d: &mut DomainBuilder<'_>, name: &str, default: T) -> SwitchModule<T>
where
    T: Value + Clone,
{
    let state = d.state(&format!("{name}.State"), default.clone());
    let current = d.query(&format!("{name}.Current"), move |ctx, _: &()| ctx.get(state));
    let switched = d.event::<Switched<T>>(&format!("{name}.Switched"));

    let switch_to = d.command(&format!("{name}.SwitchTo"), move |ctx, next: T| {
        let previous = ctx.get(state)?;
        Ok(vec![
            state.set(next.clone()),
            switched.emit(Switched {
                previous,
                current: next,
            }),
        ])
    });
    let reset = d.command(&format!("{name}.Reset"), move |_, ()| {
        Ok(vec![switch_to.call(default.clone())])
    });

    SwitchModule {
        state,
        current,
        switch_to,
        reset,
        switched,
    }
}
