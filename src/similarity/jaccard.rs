use crate::similarity::{CompareContext, Similarity};

/// Size of the intersection over the size of the union of the user sets of two items.
/// Values in the rows are ignored.
#[derive(Clone, Copy, Debug, Default)]
pub struct Jaccard;

impl Similarity for Jaccard {
    type ItemData = u64;
    type FinalItemData = ();
    type Interaction = u64;
    type FinalInteraction = f64;
    type PredictionAccumulator = f64;

    fn name(&self) -> &'static str {
        "jaccard"
    }

    fn import_item_value(&self, item_data: &mut u64, _value: f64) {
        *item_data += 1;
    }

    fn finalize_item_data(&self, _item_data: &u64, _num_users: usize) {}

    fn import_interaction_value(&self, value: f64) -> f64 {
        value
    }

    fn update_interaction(&self, interaction: &mut u64, _a: &u64, _b: &u64, _va: f64, _vb: f64) {
        *interaction += 1;
    }

    fn finalize_interaction(
        &self,
        interaction: &u64,
        item_a: &u64,
        item_b: &u64,
        _final_a: &(),
        _final_b: &(),
    ) -> f64 {
        let union = (item_a + item_b).saturating_sub(*interaction);
        if union == 0 {
            0.0
        } else {
            *interaction as f64 / union as f64
        }
    }

    fn compare(&self, first: &f64, second: &f64, _context: CompareContext<'_, ()>) -> bool {
        first > second
    }

    fn update_prediction(&self, prediction: &mut f64, similarity: &f64, _k: &(), _c: &(), weight: f64) {
        *prediction += similarity * weight;
    }

    fn finalize_prediction(&self, prediction: &f64, _candidate: &(), num_user_items: usize) -> f64 {
        prediction / num_user_items.max(1) as f64
    }

    fn export_score(&self, value: &f64) -> f64 {
        *value
    }
}
