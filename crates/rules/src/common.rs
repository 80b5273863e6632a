//! Common rules.
//!
//! Each function returns a ready-to-register [`RuleEntry`] whose URI carries
//! its arguments. Validation rules ignore unset (`null`) values, except
//! [`required`], so they compose with it.

use std::cmp::Ordering;

use serde_json::{Number, Value};

use crate::context::RuleContext;
use crate::descriptor::RuleDescriptor;
use crate::error::{Result, RuleError, RuleFault};
use crate::property::PropertyInfo;
use crate::rule::RuleEntry;

/// Error when the value is null, an empty string or an empty array.
pub fn required(property: impl Into<PropertyInfo>) -> RuleEntry {
    let property = property.into();
    let descriptor = RuleDescriptor::builder("required")
        .primary(property)
        .cacheable(true)
        .build();
    RuleEntry::from_fn(descriptor, move |ctx| {
        let missing = match ctx.input_value(&property)? {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            Value::Array(items) => items.is_empty(),
            _ => false,
        };
        if missing {
            ctx.add_error(format!("{} is required", property.friendly_name()));
        }
        Ok(())
    })
}

/// Error when a string is shorter than `min` characters.
pub fn min_length(property: impl Into<PropertyInfo>, min: usize) -> RuleEntry {
    let property = property.into();
    let descriptor = RuleDescriptor::builder("min_length")
        .primary(property)
        .arg("min", min)
        .cacheable(true)
        .build();
    RuleEntry::from_fn(descriptor, move |ctx| {
        if let Some(len) = string_length(ctx, &property)? {
            if len < min {
                ctx.add_error(format!(
                    "{} must be at least {min} characters",
                    property.friendly_name()
                ));
            }
        }
        Ok(())
    })
}

/// Error when a string is longer than `max` characters.
pub fn max_length(property: impl Into<PropertyInfo>, max: usize) -> RuleEntry {
    let property = property.into();
    let descriptor = RuleDescriptor::builder("max_length")
        .primary(property)
        .arg("max", max)
        .cacheable(true)
        .build();
    RuleEntry::from_fn(descriptor, move |ctx| {
        if let Some(len) = string_length(ctx, &property)? {
            if len > max {
                ctx.add_error(format!(
                    "{} must be at most {max} characters",
                    property.friendly_name()
                ));
            }
        }
        Ok(())
    })
}

/// Error when a number is below `min`.
pub fn min_value<N>(property: impl Into<PropertyInfo>, min: N) -> RuleEntry
where
    N: Into<Number>,
{
    let property = property.into();
    let min: Number = min.into();
    let descriptor = RuleDescriptor::builder("min_value")
        .primary(property)
        .arg("min", &min)
        .cacheable(true)
        .build();
    RuleEntry::from_fn(descriptor, move |ctx| {
        if let Some(value) = number(ctx, &property)? {
            if compare(&value, &min) == Some(Ordering::Less) {
                ctx.add_error(format!("{} must be at least {min}", property.friendly_name()));
            }
        }
        Ok(())
    })
}

/// Error when a number is above `max`.
pub fn max_value<N>(property: impl Into<PropertyInfo>, max: N) -> RuleEntry
where
    N: Into<Number>,
{
    let property = property.into();
    let max: Number = max.into();
    let descriptor = RuleDescriptor::builder("max_value")
        .primary(property)
        .arg("max", &max)
        .cacheable(true)
        .build();
    RuleEntry::from_fn(descriptor, move |ctx| {
        if let Some(value) = number(ctx, &property)? {
            if compare(&value, &max) == Some(Ordering::Greater) {
                ctx.add_error(format!("{} must be at most {max}", property.friendly_name()));
            }
        }
        Ok(())
    })
}

/// Error when a string does not match `pattern`.
///
/// Fails with [`RuleError::Config`] when the pattern does not compile.
pub fn regex_match(property: impl Into<PropertyInfo>, pattern: &str) -> Result<RuleEntry> {
    let property = property.into();
    let regex = regex::Regex::new(pattern)
        .map_err(|e| RuleError::Config(format!("invalid pattern for {property}: {e}")))?;
    let descriptor = RuleDescriptor::builder("regex_match")
        .primary(property)
        .arg("pattern", pattern)
        .cacheable(true)
        .build();
    Ok(RuleEntry::from_fn(descriptor, move |ctx| {
        let matches = match ctx.input_value(&property)? {
            Value::Null => true,
            Value::String(s) => regex.is_match(s),
            _ => false,
        };
        if !matches {
            ctx.add_error(format!(
                "{} does not have the required format",
                property.friendly_name()
            ));
        }
        Ok(())
    }))
}

/// Re-check `dependents` whenever `primary` changes.
///
/// The rule itself does nothing; its affected-property declaration drives
/// the cascade.
pub fn dependency<I, P>(primary: impl Into<PropertyInfo>, dependents: I) -> RuleEntry
where
    I: IntoIterator<Item = P>,
    P: Into<PropertyInfo>,
{
    let descriptor = dependents
        .into_iter()
        .fold(
            RuleDescriptor::builder("dependency").primary(primary),
            |builder, p| builder.affected(p),
        )
        .build();
    RuleEntry::from_fn(descriptor, |_| Ok(()))
}

/// Closure rule on `property` with a caller chosen name.
pub fn lambda<F>(name: &str, property: impl Into<PropertyInfo>, body: F) -> RuleEntry
where
    F: Fn(&mut RuleContext) -> std::result::Result<(), RuleFault> + Send + Sync + 'static,
{
    let descriptor = RuleDescriptor::builder(name).primary(property).build();
    RuleEntry::from_fn(descriptor, body)
}

fn string_length(
    ctx: &RuleContext,
    property: &PropertyInfo,
) -> std::result::Result<Option<usize>, RuleFault> {
    match ctx.input_value(property)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.chars().count())),
        other => Err(RuleFault::fail(format!(
            "{} is not text: {other}",
            property.friendly_name()
        ))),
    }
}

fn number(ctx: &RuleContext, property: &PropertyInfo) -> std::result::Result<Option<Number>, RuleFault> {
    match ctx.input_value(property)? {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(Some(n.clone())),
        other => Err(RuleFault::fail(format!(
            "{} is not a number: {other}",
            property.friendly_name()
        ))),
    }
}

/// Integers compare exactly; anything involving a float compares as `f64`.
fn compare(value: &Number, bound: &Number) -> Option<Ordering> {
    match (integer(value), integer(bound)) {
        (Some(a), Some(b)) => Some(a.cmp(&b)),
        _ => value.as_f64()?.partial_cmp(&bound.as_f64()?),
    }
}

fn integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}
