//! Substitution of `{{steps.<id>.<source>.<name>}}` references.

use serde_json::Value;

use crate::domain::evidence::EvidenceLedger;
use crate::domain::plan::{ParamRef, Parameters, RefSource};

/// Returns a copy of `parameters` with every reference replaced by the value
/// it points at in `ledger`. A reference whose step has no record, or whose
/// record lacks the named value, resolves to `null`.
pub fn resolve_parameters(parameters: &Parameters, ledger: &EvidenceLedger) -> Parameters {
    parameters
        .iter()
        .map(|(k, v)| (k.clone(), resolve_value(v, ledger)))
        .collect()
}

fn resolve_value(value: &Value, ledger: &EvidenceLedger) -> Value {
    match value {
        Value::String(s) => match ParamRef::parse(s) {
            Some(r) => lookup(&r, ledger),
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, ledger)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, ledger)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn lookup(r: &ParamRef, ledger: &EvidenceLedger) -> Value {
    let Some(record) = ledger.for_step(&r.step_id) else {
        return Value::Null;
    };
    match r.source {
        RefSource::Signals => record
            .signals
            .get(&r.name)
            .map(|s| s.to_json())
            .unwrap_or(Value::Null),
        RefSource::Payload => record.payload.field(&r.name).unwrap_or(Value::Null),
    }
}
