use dary_heap::OctonaryHeap;
use hashbrown::HashSet;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::similarity::Similarity;
use crate::sparsesim::{ItemScore, SimilarityLookup};

/// Prediction accumulators for one worker, sized to the number of items and reused across
/// calls. Only the cells touched by the previous call are cleared.
pub struct ScoreScratch<P> {
    predictions: Vec<P>,
    touched: Vec<usize>,
    occupied: Vec<bool>,
}

impl<P: Clone + Default> ScoreScratch<P> {
    pub fn new(num_items: usize) -> Self {
        ScoreScratch {
            predictions: vec![P::default(); num_items],
            touched: Vec::new(),
            occupied: vec![false; num_items],
        }
    }

    fn reset(&mut self) {
        for &item in &self.touched {
            self.predictions[item] = P::default();
            self.occupied[item] = false;
        }
        self.touched.clear();
    }

    fn cell(&mut self, item: usize) -> &mut P {
        if !self.occupied[item] {
            self.occupied[item] = true;
            self.touched.push(item);
        }
        &mut self.predictions[item]
    }
}

/// Prediction accumulators updated by several workers within one call, one lock per item.
pub struct SharedScoreScratch<P> {
    predictions: Vec<Mutex<P>>,
}

impl<P: Default> SharedScoreScratch<P> {
    pub fn new(num_items: usize) -> Self {
        SharedScoreScratch {
            predictions: (0..num_items).map(|_| Mutex::new(P::default())).collect(),
        }
    }
}

impl<S: Similarity> SimilarityLookup<S> {
    pub fn new_scratch(&self) -> ScoreScratch<S::PredictionAccumulator> {
        ScoreScratch::new(self.num_items)
    }

    pub fn new_shared_scratch(&self) -> SharedScoreScratch<S::PredictionAccumulator> {
        SharedScoreScratch::new(self.num_items)
    }

    /// Scores `candidates` in place against the `(item, weight)` pairs a user is known to
    /// have. Unknown items are ignored and unknown candidates score 0. Returns the number of
    /// prediction updates.
    pub fn score_items(
        &self,
        scratch: &mut ScoreScratch<S::PredictionAccumulator>,
        user_items: &[(usize, f64)],
        candidates: &mut [(usize, f64)],
    ) -> usize {
        let updates = self.accumulate_predictions(scratch, user_items);
        for (candidate, score) in candidates.iter_mut() {
            *score = if *candidate < self.num_items {
                self.similarity.finalize_prediction(
                    &scratch.predictions[*candidate],
                    &self.final_item_data[*candidate],
                    user_items.len(),
                )
            } else {
                0.0
            };
        }
        updates
    }

    /// Like [`score_items`](Self::score_items), but spreads the known items of a single user
    /// over the worker pool. Every prediction update takes the lock of its candidate.
    pub fn score_items_concurrent(
        &self,
        scratch: &mut SharedScoreScratch<S::PredictionAccumulator>,
        user_items: &[(usize, f64)],
        candidates: &mut [(usize, f64)],
    ) -> usize {
        scratch
            .predictions
            .par_iter_mut()
            .for_each(|prediction| *prediction.get_mut() = S::PredictionAccumulator::default());

        let predictions = &scratch.predictions;
        let updates: usize = user_items
            .par_iter()
            .filter(|(item, _)| *item < self.num_items)
            .map(|&(item, weight)| {
                let neighbors = self.neighbors(item);
                for neighbor in neighbors {
                    let mut prediction = predictions[neighbor.item].lock();
                    self.similarity.update_prediction(
                        &mut prediction,
                        &neighbor.value,
                        &self.final_item_data[item],
                        &self.final_item_data[neighbor.item],
                        weight,
                    );
                }
                neighbors.len()
            })
            .sum();

        candidates.par_iter_mut().for_each(|(candidate, score)| {
            *score = if *candidate < self.num_items {
                let prediction = predictions[*candidate].lock();
                self.similarity.finalize_prediction(
                    &prediction,
                    &self.final_item_data[*candidate],
                    user_items.len(),
                )
            } else {
                0.0
            };
        });
        updates
    }

    /// The `top_n` best scoring items reachable from the user's known items, best first.
    pub fn recommend(
        &self,
        scratch: &mut ScoreScratch<S::PredictionAccumulator>,
        user_items: &[(usize, f64)],
        top_n: usize,
        exclude_known: bool,
    ) -> Vec<(usize, f64)> {
        if top_n == 0 {
            return Vec::new();
        }
        self.accumulate_predictions(scratch, user_items);

        let known: HashSet<usize> = if exclude_known {
            user_items.iter().map(|(item, _)| *item).collect()
        } else {
            HashSet::new()
        };

        // the root is the worst of the retained candidates
        let mut best: OctonaryHeap<ItemScore> = OctonaryHeap::with_capacity(top_n);
        for &candidate in &scratch.touched {
            if known.contains(&candidate) {
                continue;
            }
            let score = self.similarity.finalize_prediction(
                &scratch.predictions[candidate],
                &self.final_item_data[candidate],
                user_items.len(),
            );
            if score.is_nan() {
                continue;
            }
            let scored = ItemScore::new(candidate, score);
            if best.len() < top_n {
                best.push(scored);
            } else if let Some(mut bottom) = best.peek_mut() {
                if scored < *bottom {
                    *bottom = scored;
                }
            }
        }

        best.into_sorted_vec()
            .into_iter()
            .map(|scored| (scored.id, scored.score))
            .collect()
    }

    fn accumulate_predictions(
        &self,
        scratch: &mut ScoreScratch<S::PredictionAccumulator>,
        user_items: &[(usize, f64)],
    ) -> usize {
        scratch.reset();
        let mut updates = 0;
        for &(item, weight) in user_items {
            if item >= self.num_items {
                continue;
            }
            for neighbor in self.neighbors(item) {
                self.similarity.update_prediction(
                    scratch.cell(neighbor.item),
                    &neighbor.value,
                    &self.final_item_data[item],
                    &self.final_item_data[neighbor.item],
                    weight,
                );
                updates += 1;
            }
        }
        updates
    }
}

#[cfg(test)]
mod scoring_test {
    use float_cmp::approx_eq;

    use super::*;
    use crate::similarity::{CoOccurrence, Jaccard};
    use crate::sparsesim::options::SimilarityOptions;

    fn cooccurrence_lookup() -> SimilarityLookup<CoOccurrence> {
        let triples = vec![(0, 1, 3.0), (0, 2, 1.0), (1, 2, 2.0), (2, 3, 4.0)];
        SimilarityLookup::from_raw_similarities(
            CoOccurrence,
            SimilarityOptions::default(),
            5,
            vec![(); 5],
            &triples,
            true,
        )
        .unwrap()
    }

    #[test]
    fn should_sum_weighted_neighbor_scores() {
        let lookup = cooccurrence_lookup();
        let mut scratch = lookup.new_scratch();
        let mut candidates = vec![(1, 0.0), (2, 0.0), (3, 0.0), (4, 0.0), (9, 0.0)];
        let updates = lookup.score_items(&mut scratch, &[(0, 1.0), (3, 2.0)], &mut candidates);

        // item 0 reaches 1 and 2, item 3 reaches 2
        assert_eq!(3, updates);
        assert_eq!(vec![(1, 3.0), (2, 9.0), (3, 0.0), (4, 0.0), (9, 0.0)], candidates);
    }

    #[test]
    fn should_reset_scratch_between_calls() {
        let lookup = cooccurrence_lookup();
        let mut scratch = lookup.new_scratch();
        let mut first = vec![(2, 0.0)];
        lookup.score_items(&mut scratch, &[(3, 1.0)], &mut first);
        let mut second = vec![(2, 0.0)];
        lookup.score_items(&mut scratch, &[(3, 1.0)], &mut second);
        assert_eq!(first, second);
        assert_eq!(vec![(2, 4.0)], second);
    }

    #[test]
    fn should_score_concurrently_like_exclusive_scratch() {
        let lookup = cooccurrence_lookup();
        let user_items = vec![(0, 1.0), (1, 0.5), (3, 2.0), (7, 1.0)];
        let mut expected: Vec<(usize, f64)> = (0..6).map(|item| (item, 0.0)).collect();
        let mut actual = expected.clone();

        let mut scratch = lookup.new_scratch();
        let updates = lookup.score_items(&mut scratch, &user_items, &mut expected);
        let mut shared = lookup.new_shared_scratch();
        for _ in 0..2 {
            assert_eq!(updates, lookup.score_items_concurrent(&mut shared, &user_items, &mut actual));
            for (a, b) in expected.iter().zip(actual.iter()) {
                assert_eq!(a.0, b.0);
                assert!(approx_eq!(f64, a.1, b.1, ulps = 2));
            }
        }
    }

    #[test]
    fn should_recommend_best_unknown_items() {
        let lookup = cooccurrence_lookup();
        let mut scratch = lookup.new_scratch();

        let recommendations = lookup.recommend(&mut scratch, &[(0, 1.0), (3, 1.0)], 10, true);
        assert_eq!(vec![(2, 5.0), (1, 3.0)], recommendations);

        let with_known = lookup.recommend(&mut scratch, &[(0, 1.0), (3, 1.0)], 2, false);
        assert_eq!(vec![(2, 5.0), (1, 3.0)], with_known);

        let top_one = lookup.recommend(&mut scratch, &[(2, 1.0)], 1, false);
        assert_eq!(vec![(3, 4.0)], top_one);
    }

    #[test]
    fn should_break_recommendation_ties_by_item() {
        let triples = vec![(0, 3, 1.0), (0, 1, 1.0), (0, 2, 1.0)];
        let lookup = SimilarityLookup::from_raw_similarities(
            Jaccard,
            SimilarityOptions::default(),
            4,
            vec![(); 4],
            &triples,
            false,
        )
        .unwrap();
        let mut scratch = lookup.new_scratch();
        let recommendations = lookup.recommend(&mut scratch, &[(0, 1.0)], 2, true);
        assert_eq!(vec![(1, 1.0), (2, 1.0)], recommendations);
    }
}
