use crate::similarity::{CompareContext, Similarity};

/// Number of users that referenced both items.
#[derive(Clone, Copy, Debug, Default)]
pub struct CoOccurrence;

impl Similarity for CoOccurrence {
    type ItemData = ();
    type FinalItemData = ();
    type Interaction = u64;
    type FinalInteraction = f64;
    type PredictionAccumulator = f64;

    fn name(&self) -> &'static str {
        "cooccurrence"
    }

    fn import_item_value(&self, _item_data: &mut (), _value: f64) {}

    fn finalize_item_data(&self, _item_data: &(), _num_users: usize) {}

    fn import_interaction_value(&self, value: f64) -> f64 {
        value
    }

    fn update_interaction(&self, interaction: &mut u64, _a: &(), _b: &(), _va: f64, _vb: f64) {
        *interaction += 1;
    }

    fn finalize_interaction(&self, interaction: &u64, _a: &(), _b: &(), _fa: &(), _fb: &()) -> f64 {
        *interaction as f64
    }

    fn compare(&self, first: &f64, second: &f64, _context: CompareContext<'_, ()>) -> bool {
        first > second
    }

    fn update_prediction(&self, prediction: &mut f64, similarity: &f64, _k: &(), _c: &(), weight: f64) {
        *prediction += similarity * weight;
    }

    fn finalize_prediction(&self, prediction: &f64, _candidate: &(), _num_user_items: usize) -> f64 {
        *prediction
    }

    fn export_score(&self, value: &f64) -> f64 {
        *value
    }
}
