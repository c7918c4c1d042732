//! Energy, cooling, and acceptance.

/// Weight of aggregate resource cost in the energy.
pub const COST_FACTOR: f64 = 0.7;
/// Weight of merged coverage in the energy.
pub const COVERAGE_FACTOR: f64 = 0.3;

/// `0.7 · Σweight − 0.3 · merged coverage`. Lower is better.
pub fn energy(total_weight: f64, merged_coverage: u64) -> f64 {
    COST_FACTOR * total_weight - COVERAGE_FACTOR * merged_coverage as f64
}

/// One cooling step: `max(T · rate, min)`.
pub fn next_temperature(temperature: f64, cool_rate: f64, min_temp: f64) -> f64 {
    (temperature * cool_rate).max(min_temp)
}

/// Metropolis acceptance probability for moving from `current` to
/// `candidate` at `temperature`.
pub fn acceptance_probability(current: f64, candidate: f64, temperature: f64) -> f64 {
    if candidate <= current {
        1.0
    } else {
        (-(candidate - current) / temperature).exp()
    }
}
