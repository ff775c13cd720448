use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod cooccurrence;
pub mod cosine;
pub mod jaccard;
pub mod pearson;

pub use cooccurrence::CoOccurrence;
pub use cosine::Cosine;
pub use jaccard::Jaccard;
pub use pearson::Pearson;

/// Final item data of the item whose neighbors are ranked, and of the two candidates compared.
pub struct CompareContext<'a, F> {
    pub item: &'a F,
    pub first: &'a F,
    pub second: &'a F,
}

/// The arithmetic of a similarity measure. The lookup is generic over this trait and never
/// looks inside the value types.
///
/// Items are accumulated from rows of `(item, value)` pairs. For every pair of items `a < b`
/// co-occurring in a row, `update_interaction` is called with the values of both items in that
/// row; once all rows are seen the accumulator is turned into a `FinalInteraction`.
///
/// `update_interaction` must be commutative over rows, otherwise the lookup depends on the
/// order in which the workers see the data. `compare` must agree with the ordering of
/// `export_score`: the lookup uses the exported score for an unlocked admission check.
pub trait Similarity: Send + Sync {
    type ItemData: Clone + Default + Send + Sync;
    type FinalItemData: Clone + Default + Debug + Send + Sync + Serialize + DeserializeOwned;
    type Interaction: Clone + Default + PartialEq + Send + Sync;
    type FinalInteraction: Copy
        + Default
        + Debug
        + PartialEq
        + Send
        + Sync
        + Serialize
        + DeserializeOwned;
    type PredictionAccumulator: Clone + Default + Send;

    fn name(&self) -> &'static str;

    /// Fold one observed value of an item into its statistics.
    fn import_item_value(&self, item_data: &mut Self::ItemData, value: f64);

    fn finalize_item_data(&self, item_data: &Self::ItemData, num_users: usize)
        -> Self::FinalItemData;

    /// Convert an externally provided similarity score into a stored value.
    fn import_interaction_value(&self, value: f64) -> Self::FinalInteraction;

    fn update_interaction(
        &self,
        interaction: &mut Self::Interaction,
        item_a: &Self::ItemData,
        item_b: &Self::ItemData,
        value_a: f64,
        value_b: f64,
    );

    fn finalize_interaction(
        &self,
        interaction: &Self::Interaction,
        item_a: &Self::ItemData,
        item_b: &Self::ItemData,
        final_a: &Self::FinalItemData,
        final_b: &Self::FinalItemData,
    ) -> Self::FinalInteraction;

    /// True when `first` ranks as more similar than `second`.
    fn compare(
        &self,
        first: &Self::FinalInteraction,
        second: &Self::FinalInteraction,
        context: CompareContext<'_, Self::FinalItemData>,
    ) -> bool;

    fn update_prediction(
        &self,
        prediction: &mut Self::PredictionAccumulator,
        similarity: &Self::FinalInteraction,
        known_item: &Self::FinalItemData,
        candidate_item: &Self::FinalItemData,
        weight: f64,
    );

    fn finalize_prediction(
        &self,
        prediction: &Self::PredictionAccumulator,
        candidate_item: &Self::FinalItemData,
        num_user_items: usize,
    ) -> f64;

    fn export_score(&self, value: &Self::FinalInteraction) -> f64;
}
