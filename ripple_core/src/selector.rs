use crate::mutator::{MutationError, MutationOperator, Mutator};
use log::trace;
use rand::Rng;
use thiserror::Error;

/// Errors that can occur while building a [`WeightedSelector`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    /// No operators were supplied, so nothing could ever be selected.
    #[error("At least one mutation operator is required")]
    NoOperators,
    /// A zero weight would give the operator an empty slice of the draw range.
    #[error("Operator '{0}' has weight 0; weights must be positive")]
    ZeroWeight(&'static str),
    /// The weights do not fit into the draw range.
    #[error("Sum of operator weights overflows u32")]
    WeightOverflow,
}

/// An operator together with its weight and cumulative threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedOperator {
    pub operator: MutationOperator,
    pub weight: u32,
    /// Sum of the weights of this and all preceding operators.
    pub threshold: u32,
}

/// Picks one operator per mutation event with probability proportional to its weight.
///
/// Thresholds are prefix sums of the weights in list order. A selection draws
/// one integer `r` uniformly in `[0, total)` and takes the first operator whose
/// threshold is greater than `r`, so operator `i` wins with probability
/// `weight_i / total`.
#[derive(Debug, Clone)]
pub struct WeightedSelector {
    entries: Vec<WeightedOperator>,
}

impl WeightedSelector {
    /// Builds the threshold table. The order of `weights` is kept.
    pub fn new(weights: Vec<(MutationOperator, u32)>) -> Result<Self, SelectorError> {
        if weights.is_empty() {
            return Err(SelectorError::NoOperators);
        }

        let mut entries = Vec::with_capacity(weights.len());
        let mut threshold: u32 = 0;
        for (operator, weight) in weights {
            if weight == 0 {
                return Err(SelectorError::ZeroWeight(operator.name()));
            }
            threshold = threshold
                .checked_add(weight)
                .ok_or(SelectorError::WeightOverflow)?;
            entries.push(WeightedOperator {
                operator,
                weight,
                threshold,
            });
        }

        Ok(Self { entries })
    }

    /// The threshold table, in list order.
    pub fn entries(&self) -> &[WeightedOperator] {
        &self.entries
    }

    /// Sum of all weights; the last entry's threshold.
    pub fn total_weight(&self) -> u32 {
        self.entries.last().map_or(0, |entry| entry.threshold)
    }

    /// Resolves a draw to the first entry with `draw < threshold`.
    ///
    /// Returns `None` when `draw` is outside `[0, total)`.
    pub fn select_for_draw(&self, draw: u32) -> Option<&WeightedOperator> {
        let index = self.entries.partition_point(|entry| entry.threshold <= draw);
        self.entries.get(index)
    }

    /// Draws one operator from `rng`. Consumes exactly one value from the generator.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> &WeightedOperator {
        let draw = rng.random_range(0..self.total_weight());
        let index = self
            .entries
            .partition_point(|entry| entry.threshold <= draw)
            .min(self.entries.len() - 1);
        &self.entries[index]
    }
}

/// Selecting and applying in one step, so the engine only needs a `Mutator`.
impl<R: Rng + ?Sized> Mutator<String, R> for WeightedSelector {
    fn mutate(&mut self, input: &String, rng: &mut R) -> Result<String, MutationError> {
        let operator = self.select(rng).operator;
        trace!("Applying {operator} to {input:?}");
        operator.apply(input, rng)
    }
}
