use crate::similarity::{CompareContext, Similarity};

/// Cosine of the angle between the user vectors of two items.
#[derive(Clone, Copy, Debug, Default)]
pub struct Cosine;

impl Similarity for Cosine {
    // sum of squares of the item's values
    type ItemData = f64;
    type FinalItemData = ();
    // dot product over co-occurring users
    type Interaction = f64;
    type FinalInteraction = f64;
    type PredictionAccumulator = f64;

    fn name(&self) -> &'static str {
        "cosine"
    }

    fn import_item_value(&self, item_data: &mut f64, value: f64) {
        *item_data += value * value;
    }

    fn finalize_item_data(&self, _item_data: &f64, _num_users: usize) {}

    fn import_interaction_value(&self, value: f64) -> f64 {
        value
    }

    fn update_interaction(&self, interaction: &mut f64, _a: &f64, _b: &f64, value_a: f64, value_b: f64) {
        *interaction += value_a * value_b;
    }

    fn finalize_interaction(
        &self,
        interaction: &f64,
        item_a: &f64,
        item_b: &f64,
        _final_a: &(),
        _final_b: &(),
    ) -> f64 {
        let norm = (item_a * item_b).sqrt();
        if norm > 0.0 {
            interaction / norm
        } else {
            0.0
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

#[cfg(test)]
mod cosine_test {
    use float_cmp::approx_eq;

    use super::*;

    #[test]
    fn should_normalize_dot_product() {
        let cosine = Cosine;
        // a = (1, 2), b = (2, 4) are parallel
        let (mut ss_a, mut ss_b) = (0.0, 0.0);
        for (va, vb) in [(1.0, 2.0), (2.0, 4.0)] {
            cosine.import_item_value(&mut ss_a, va);
            cosine.import_item_value(&mut ss_b, vb);
        }
        let mut dot = 0.0;
        cosine.update_interaction(&mut dot, &ss_a, &ss_b, 1.0, 2.0);
        cosine.update_interaction(&mut dot, &ss_a, &ss_b, 2.0, 4.0);
        let similarity = cosine.finalize_interaction(&dot, &ss_a, &ss_b, &(), &());
        assert!(approx_eq!(f64, 1.0, similarity, ulps = 4));
    }

    #[test]
    fn should_not_divide_by_zero() {
        assert_eq!(0.0, Cosine.finalize_interaction(&0.0, &0.0, &1.0, &(), &()));
    }
}
