use crate::similarity::{CompareContext, Similarity};

/// Pearson correlation of the values two items received from the users that rated both.
/// Predictions are mean-centred on the candidate item.
#[derive(Clone, Copy, Debug, Default)]
pub struct Pearson;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PearsonItem {
    pub count: u64,
    pub sum: f64,
    pub sum_of_squares: f64,
}

impl PearsonItem {
    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PearsonInteraction {
    pub count: u64,
    pub cross: f64,
    pub squares_a: f64,
    pub squares_b: f64,
}

#[derive(Clone, Debug, Default)]
pub struct PearsonPrediction {
    pub weighted_deviation: f64,
    pub total_weight: f64,
}

impl Similarity for Pearson {
    type ItemData = PearsonItem;
    // item mean
    type FinalItemData = f64;
    type Interaction = PearsonInteraction;
    type FinalInteraction = f64;
    type PredictionAccumulator = PearsonPrediction;

    fn name(&self) -> &'static str {
        "pearson"
    }

    fn import_item_value(&self, item_data: &mut PearsonItem, value: f64) {
        item_data.count += 1;
        item_data.sum += value;
        item_data.sum_of_squares += value * value;
    }

    fn finalize_item_data(&self, item_data: &PearsonItem, _num_users: usize) -> f64 {
        item_data.mean()
    }

    fn import_interaction_value(&self, value: f64) -> f64 {
        value
    }

    fn update_interaction(
        &self,
        interaction: &mut PearsonInteraction,
        item_a: &PearsonItem,
        item_b: &PearsonItem,
        value_a: f64,
        value_b: f64,
    ) {
        let deviation_a = value_a - item_a.mean();
        let deviation_b = value_b - item_b.mean();
        interaction.count += 1;
        interaction.cross += deviation_a * deviation_b;
        interaction.squares_a += deviation_a * deviation_a;
        interaction.squares_b += deviation_b * deviation_b;
    }

    fn finalize_interaction(
        &self,
        interaction: &PearsonInteraction,
        _item_a: &PearsonItem,
        _item_b: &PearsonItem,
        _final_a: &f64,
        _final_b: &f64,
    ) -> f64 {
        let norm = (interaction.squares_a * interaction.squares_b).sqrt();
        if interaction.count < 2 || norm <= 0.0 {
            return 0.0;
        }
        (interaction.cross / norm).clamp(-1.0, 1.0)
    }

    fn compare(&self, first: &f64, second: &f64, _context: CompareContext<'_, f64>) -> bool {
        first > second
    }

    fn update_prediction(
        &self,
        prediction: &mut PearsonPrediction,
        similarity: &f64,
        known_item_mean: &f64,
        _candidate_mean: &f64,
        weight: f64,
    ) {
        prediction.weighted_deviation += similarity * (weight - known_item_mean);
        prediction.total_weight += similarity.abs();
    }

    fn finalize_prediction(
        &self,
        prediction: &PearsonPrediction,
        candidate_mean: &f64,
        _num_user_items: usize,
    ) -> f64 {
        if prediction.total_weight > 0.0 {
            candidate_mean + prediction.weighted_deviation / prediction.total_weight
        } else {
            *candidate_mean
        }
    }

    fn export_score(&self, value: &f64) -> f64 {
        *value
    }
}
