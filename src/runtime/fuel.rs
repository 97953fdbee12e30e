//! Fuel for the machine

/// Instruction budget for [`super::Executor::step`]. Every executed
/// instruction consumes one unit.
#[derive(Debug, Clone)]
pub struct Fuel {
    fuel: i32,
}

impl Fuel {
    pub fn with(fuel: i32) -> Self {
        Self { fuel }
    }

    /// Refills fuel up to a given maximum.
    ///
    /// Intended to be called between calls to `Executor::step`, so that a
    /// caller re-using one container credits the executor with fuel without
    /// letting it grow unbounded.
    pub fn refill(&mut self, fuel: i32, max_fuel: i32) {
        self.fuel = self.fuel.saturating_add(fuel).min(max_fuel);
    }

    /// Subtract from the current remaining fuel.
    pub fn consume(&mut self, fuel: i32) {
        self.fuel = self.fuel.saturating_sub(fuel);
    }

    pub fn remaining(&self) -> i32 {
        self.fuel
    }

    /// Returns true if we have positive fuel remaining.
    pub fn should_continue(&self) -> bool {
        self.fuel > 0
    }
}
