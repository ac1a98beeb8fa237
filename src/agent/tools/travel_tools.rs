//! Reference travel tools backed by a deterministic in-memory catalogue.

use serde_json::{Value, json};

use super::{Tool, ToolContext, ToolFuture, location_or_destination, str_arg};
use crate::models::ToolDefinition;

const AIRLINES: [&str; 3] = ["Alaska", "Delta", "United"];
const HOTELS: [(&str, f64, f64); 3] = [
    ("Harbor View Inn", 149.0, 4.1),
    ("Grand Central Suites", 229.0, 4.6),
    ("Budget Stay", 89.0, 3.5),
];
const ACTIVITIES: [(&str, &str, f64); 4] = [
    ("Walking food tour", "food", 65.0),
    ("City museum pass", "culture", 40.0),
    ("Bay kayak trip", "outdoors", 85.0),
    ("Evening jazz club", "nightlife", 30.0),
];

fn seed(s: &str) -> u64 {
    s.bytes().fold(7u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64))
}

fn airport(args: &Value, key: &str) -> anyhow::Result<String> {
    let code = str_arg(args, key).ok_or_else(|| anyhow::anyhow!("missing {}", key))?;
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        anyhow::bail!("{} must be a 3-letter airport code, got {:?}", key, code);
    }
    Ok(code.to_ascii_uppercase())
}

pub struct SearchFlightsTool {
    def: ToolDefinition,
}

impl SearchFlightsTool {
    pub fn new() -> Self {
        Self {
            def: ToolDefinition::new("search_flights", "Search flights between two airports on a date")
                .param("origin", "string", "Origin airport IATA code", true)
                .param("destination", "string", "Destination airport IATA code", true)
                .param("date", "string", "Departure date, YYYY-MM-DD", false),
        }
    }

    async fn call(&self, _ctx: ToolContext<'_>, args: Value) -> anyhow::Result<Value> {
        let origin = airport(&args, "origin")?;
        let destination = airport(&args, "destination")?;
        if origin == destination {
            anyhow::bail!("origin and destination are the same airport");
        }
        let date = str_arg(&args, "date").map(str::to_string);
        let base = 120 + (seed(&format!("{}{}", origin, destination)) % 180) as i64;
        let options: Vec<Value> = AIRLINES
            .iter()
            .enumerate()
            .map(|(i, airline)| {
                json!({
                    "id": format!("FL-{}-{}-{}", origin, destination, i + 1),
                    "airline": airline,
                    "departure": format!("{:02}:15", 7 + i * 4),
                    "price": (base + 35 * i as i64) as f64,
                })
            })
            .collect();
        Ok(json!({ "origin": origin, "destination": destination, "date": date, "options": options }))
    }
}

impl Tool for SearchFlightsTool {
    fn definition(&self) -> &ToolDefinition { &self.def }

    fn run<'a>(&'a self, ctx: ToolContext<'a>, args: Value) -> ToolFuture<'a> {
        Box::pin(self.call(ctx, args))
    }
}

pub struct SearchHotelsTool {
    def: ToolDefinition,
}

impl SearchHotelsTool {
    pub fn new() -> Self {
        Self {
            def: ToolDefinition::new("search_hotels", "Search hotels in a city or near an airport")
                .param("location", "string", "City or airport code; defaults to the flight destination", false)
                .param("checkIn", "string", "Check-in date, YYYY-MM-DD", false)
                .param("nights", "integer", "Number of nights", false)
                .param("maxPricePerNight", "number", "Upper bound on nightly rate", false),
        }
    }

    async fn call(&self, ctx: ToolContext<'_>, args: Value) -> anyhow::Result<Value> {
        let location = location_or_destination(&args, ctx.view, "location")?;
        let check_in = str_arg(&args, "checkIn")
            .or_else(|| ctx.view.pointer("/flightInfo/date").and_then(|v| v.as_str()))
            .map(str::to_string);
        let nights = args.get("nights").and_then(|v| v.as_u64()).unwrap_or(1).max(1);
        let cap = args.get("maxPricePerNight").and_then(|v| v.as_f64()).unwrap_or(f64::MAX);
        let options: Vec<Value> = HOTELS
            .iter()
            .enumerate()
            .filter(|(_, (_, price, _))| *price <= cap)
            .map(|(i, (name, price, rating))| {
                json!({
                    "id": format!("HTL-{}-{}", location.to_ascii_uppercase().replace(' ', "-"), i + 1),
                    "name": name,
                    "pricePerNight": price,
                    "rating": rating,
                })
            })
            .collect();
        Ok(json!({ "location": location, "checkIn": check_in, "nights": nights, "options": options }))
    }
}

impl Tool for SearchHotelsTool {
    fn definition(&self) -> &ToolDefinition { &self.def }

    fn run<'a>(&'a self, ctx: ToolContext<'a>, args: Value) -> ToolFuture<'a> {
        Box::pin(self.call(ctx, args))
    }
}

pub struct SearchActivitiesTool {
    def: ToolDefinition,
}

impl SearchActivitiesTool {
    pub fn new() -> Self {
        Self {
            def: ToolDefinition::new("search_activities", "Suggest activities at a destination")
                .param("location", "string", "City or airport code; defaults to the flight destination", false)
                .array_param("interests", "string", "Categories such as food, culture, outdoors", false),
        }
    }

    async fn call(&self, ctx: ToolContext<'_>, args: Value) -> anyhow::Result<Value> {
        let location = location_or_destination(&args, ctx.view, "location")?;
        let interests: Vec<String> = args
            .get("interests")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str()).map(str::to_ascii_lowercase).collect())
            .unwrap_or_default();
        let options: Vec<Value> = ACTIVITIES
            .iter()
            .filter(|(_, cat, _)| interests.is_empty() || interests.iter().any(|i| i == cat))
            .map(|(name, cat, price)| json!({ "name": name, "category": cat, "price": price }))
            .collect();
        Ok(json!({ "location": location, "options": options }))
    }
}

impl Tool for SearchActivitiesTool {
    fn definition(&self) -> &ToolDefinition { &self.def }

    fn run<'a>(&'a self, ctx: ToolContext<'a>, args: Value) -> ToolFuture<'a> {
        Box::pin(self.call(ctx, args))
    }
}
