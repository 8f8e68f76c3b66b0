//! Reading widget traits from inside a reactive computation. Each read
//! subscribes the current run to the trait; the subscription is dropped the
//! first time that run is invalidated.

use crate::error::{BridgeError, Result};
use crate::host::Host;
use crate::value::StateValue;
use crate::widget::Widget;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraitNames<'a> {
    One(&'a str),
    Many(Vec<&'a str>),
}

impl<'a> TraitNames<'a> {
    fn as_slice(&self) -> &[&'a str] {
        match self {
            TraitNames::One(name) => std::slice::from_ref(name),
            TraitNames::Many(names) => names,
        }
    }
}

impl<'a> From<&'a str> for TraitNames<'a> {
    fn from(name: &'a str) -> Self {
        TraitNames::One(name)
    }
}

impl<'a> From<Vec<&'a str>> for TraitNames<'a> {
    fn from(names: Vec<&'a str>) -> Self {
        TraitNames::Many(names)
    }
}

impl<'a, const N: usize> From<[&'a str; N]> for TraitNames<'a> {
    fn from(names: [&'a str; N]) -> Self {
        TraitNames::Many(names.to_vec())
    }
}

/// A single name reads one value; a list reads a tuple in the same order.
#[derive(Debug, Clone, PartialEq)]
pub enum TraitRead {
    One(StateValue),
    Many(Vec<StateValue>),
}

impl TraitRead {
    pub fn into_value(self) -> StateValue {
        match self {
            TraitRead::One(value) => value,
            TraitRead::Many(values) => StateValue::Tuple(values),
        }
    }
}

pub fn reactive_read<'a>(
    host: &dyn Host,
    widget: &Widget,
    names: impl Into<TraitNames<'a>>,
) -> Result<TraitRead> {
    let names = names.into();
    reactive_depend(host, widget, names.clone())?;

    let value = |name: &str| widget.get(name).unwrap_or(StateValue::Null);
    Ok(match names {
        TraitNames::One(name) => TraitRead::One(value(name)),
        TraitNames::Many(names) => TraitRead::Many(names.into_iter().map(value).collect()),
    })
}

/// Invalidate the current computation when any of `names` changes.
pub fn reactive_depend<'a>(
    host: &dyn Host,
    widget: &Widget,
    names: impl Into<TraitNames<'a>>,
) -> Result<()> {
    let names = names.into();
    let ctx = host
        .current_computation()
        .ok_or(BridgeError::NoActiveContext)?;

    for name in names.as_slice() {
        if !widget.has_trait(name) {
            return Err(BridgeError::UnknownTrait {
                widget_type: widget.type_name().to_string(),
                name: name.to_string(),
            });
        }
    }

    // An observer with no names would see every trait.
    if names.as_slice().is_empty() {
        return Ok(());
    }

    let weak_ctx = Rc::downgrade(&ctx);
    let observer = widget.observe(names.as_slice(), move |_| {
        if let Some(ctx) = weak_ctx.upgrade() {
            ctx.invalidate();
        }
    });

    let weak_widget = widget.downgrade();
    ctx.on_invalidate(Box::new(move || {
        if let Some(widget) = weak_widget.upgrade() {
            widget.unobserve(observer);
        }
    }));
    Ok(())
}
