//! File formats exchanged with the device simulator
//!
//! - [`DeviceTable`]: the layer-by-layer input CSV the simulator reads
//! - [`JvCurve`]: simulated (`JV.csv`) and measured reference curves
//! - [`Stats`]: the `metric,value` summary the simulator writes after a run

mod curve;
mod stats;
mod table;

pub use curve::{JvCurve, Sweep};
pub use stats::Stats;
pub use table::DeviceTable;

/// Split one CSV line into raw fields, keeping quotes and surrounding whitespace
pub(crate) fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Parse a raw field as a number, ignoring whitespace and surrounding quotes
pub(crate) fn parse_number(field: &str) -> Option<f64> {
    field.trim().trim_matches('"').trim().parse::<f64>().ok()
}
