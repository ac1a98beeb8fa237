use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::DispatchError;

/// Top-level keys of the serialized plan that are not slots.
const RESERVED_SLOTS: &[&str] = &["aggregate", "updatedAt"];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanAggregate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<usize>,
}

/// Slot-keyed results accumulated across agent runs within one session.
///
/// Every slot is last-write-wins: [`Plan::merge`] replaces the previous value
/// wholesale. The aggregate is recomputed after each write. Slots share the
/// serialized object with the aggregate fields, so those names are reserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(flatten)]
    slots: BTreeMap<String, Value>,
    aggregate: PlanAggregate,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, slot: &str, value: Value) -> Result<(), DispatchError> {
        if RESERVED_SLOTS.contains(&slot) {
            return Err(DispatchError::ReservedSlot(slot.to_string()));
        }
        self.slots.insert(slot.to_string(), value);
        self.aggregate = compute_aggregate(&self.slots);
        self.updated_at = Some(Utc::now());
        Ok(())
    }

    pub fn get(&self, slot: &str) -> Option<&Value> {
        self.slots.get(slot)
    }

    pub fn aggregate(&self) -> &PlanAggregate {
        &self.aggregate
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Read-only projection: each `(slot, name)` present in the plan is copied
    /// under `name`.
    pub fn project(&self, keys: &[(&str, &str)]) -> Value {
        let mut out = Map::new();
        for (slot, name) in keys {
            if let Some(v) = self.slots.get(*slot) {
                out.insert(name.to_string(), v.clone());
            }
        }
        Value::Object(out)
    }

    /// The whole plan as a JSON object, aggregate included.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Domain slots other than the ones named in `exclude`.
    pub fn recommendations(&self, exclude: &[&str]) -> Value {
        let map: Map<String, Value> = self
            .slots
            .iter()
            .filter(|(k, _)| !exclude.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(map)
    }

    /// Plain-text digest used when no model is available to write a summary.
    pub fn describe(&self) -> String {
        if self.is_empty() {
            return "Nothing has been planned yet.".to_string();
        }
        let mut lines: Vec<String> = self.slots.iter().map(|(k, v)| format!("- {}: {}", k, brief(v))).collect();
        if let Some(cost) = self.aggregate.total_cost {
            lines.push(format!("- estimated total: ${:.2}", cost));
        }
        if let Some(n) = self.aggregate.candidate_count {
            lines.push(format!("- candidates shortlisted: {}", n));
        }
        lines.join("\n")
    }
}

fn brief(v: &Value) -> String {
    let mut parts = Vec::new();
    for key in ["origin", "destination", "location", "date", "candidateName"] {
        if let Some(s) = v.get(key).and_then(|x| x.as_str()) {
            parts.push(format!("{} {}", key, s));
        }
    }
    if let Some(opts) = v.get("options").or_else(|| v.get("candidates")).and_then(|o| o.as_array()) {
        parts.push(format!("{} option(s)", opts.len()));
    } else if let Some(arr) = v.as_array() {
        parts.push(format!("{} item(s)", arr.len()));
    }
    if parts.is_empty() { "recorded".to_string() } else { parts.join(", ") }
}

/// First option of a slot value: `options[0]`, `[0]`, or the value itself.
fn top(v: &Value) -> &Value {
    if let Some(first) = v.get("options").and_then(|o| o.as_array()).and_then(|a| a.first()) {
        return first;
    }
    if let Some(first) = v.as_array().and_then(|a| a.first()) {
        return first;
    }
    v
}

fn cost_of(slot: &Value) -> Option<f64> {
    let t = top(slot);
    let num = |key: &str| t.get(key).and_then(|x| x.as_f64());
    if let Some(total) = num("totalPrice") {
        return Some(total);
    }
    if let Some(price) = num("price") {
        return Some(price);
    }
    let nightly = num("pricePerNight")?;
    let nights = t
        .get("nights")
        .or_else(|| slot.get("nights"))
        .and_then(|x| x.as_f64())
        .unwrap_or(1.0);
    Some(nightly * nights)
}

fn compute_aggregate(slots: &BTreeMap<String, Value>) -> PlanAggregate {
    let costs: Vec<f64> = slots.values().filter_map(cost_of).collect();
    let total_cost = if costs.is_empty() { None } else { Some((costs.iter().sum::<f64>() * 100.0).round() / 100.0) };
    let candidate_count = slots.get("candidates").and_then(|c| {
        c.as_array()
            .or_else(|| c.get("candidates").and_then(|x| x.as_array()))
            .map(Vec::len)
    });
    PlanAggregate { total_cost, candidate_count }
}

/// Day-by-day itinerary. An integrator-written `itinerary` slot wins; otherwise
/// one is assembled from flights, hotels and (optionally) activities.
pub fn synthesize_itinerary(plan: &Plan) -> Result<Value, DispatchError> {
    match plan.get("itinerary") {
        Some(existing) => Ok(existing.clone()),
        None => assemble_itinerary(plan),
    }
}

/// Builds an itinerary from the domain slots, ignoring any stored one.
pub fn assemble_itinerary(plan: &Plan) -> Result<Value, DispatchError> {
    let flights = plan
        .get("flights")
        .ok_or_else(|| DispatchError::InsufficientPlan("no flights selected yet".into()))?;
    let hotels = plan
        .get("hotels")
        .ok_or_else(|| DispatchError::InsufficientPlan("no hotel selected yet".into()))?;

    let flight = top(flights);
    let hotel = top(hotels);
    let str_of = |v: &Value, k: &str| v.get(k).and_then(|x| x.as_str()).map(str::to_string);

    let origin = str_of(flights, "origin").unwrap_or_else(|| "origin".into());
    let destination = str_of(flights, "destination")
        .or_else(|| str_of(hotels, "location"))
        .unwrap_or_else(|| "destination".into());
    let start = str_of(flights, "date").and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok());
    let nights = hotels.get("nights").and_then(|n| n.as_u64()).unwrap_or(1).max(1) as usize;
    let hotel_name = str_of(hotel, "name").or_else(|| str_of(hotel, "id")).unwrap_or_else(|| "hotel".into());

    let activities: Vec<String> = plan
        .get("activities")
        .and_then(|a| a.get("options").or(Some(a)))
        .and_then(|o| o.as_array())
        .map(|arr| arr.iter().filter_map(|x| str_of(x, "name")).collect())
        .unwrap_or_default();

    let mut days = Vec::with_capacity(nights + 1);
    for day in 0..=nights {
        let mut items = Vec::new();
        if day == 0 {
            let carrier = str_of(flight, "airline").map(|a| format!(" with {}", a)).unwrap_or_default();
            items.push(format!("Fly {} to {}{}", origin, destination, carrier));
            items.push(format!("Check in at {}", hotel_name));
        }
        if day < nights {
            if let Some(a) = activities.get(day) {
                items.push(a.clone());
            }
        } else {
            items.push(format!("Check out of {}", hotel_name));
        }
        let date = start.map(|s| (s + Duration::days(day as i64)).format("%Y-%m-%d").to_string());
        days.push(json!({ "day": day + 1, "date": date, "items": items }));
    }

    Ok(json!({
        "destination": destination,
        "startDate": start.map(|s| s.format("%Y-%m-%d").to_string()),
        "days": days,
        "totalCost": plan.aggregate().total_cost,
    }))
}
