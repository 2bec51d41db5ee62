//! Merge advice: which convoys could travel as one.

use std::collections::{BTreeMap, HashMap};

use crate::conflict::{hours_between, segment_windows, SegmentWindow};
use crate::models::{Convoy, MergeSuggestion};
use crate::rules::RoutingRules;
use crate::spatial::interval_overlap;

#[derive(Debug, Clone)]
struct Candidate {
    a: String,
    b: String,
    savings: f64,
    confidence: f64,
}

#[derive(Debug, Clone, Default)]
pub struct MergeAdvisor {
    rules: RoutingRules,
}

impl MergeAdvisor {
    pub fn new(rules: RoutingRules) -> Self {
        Self { rules }
    }

    /// At most one suggestion per convoy id.
    pub fn suggest_merges(&self, convoys: &[Convoy]) -> HashMap<String, MergeSuggestion> {
        let mut eligible: Vec<&Convoy> = convoys
            .iter()
            .filter(|c| c.is_active() && c.assigned_route.is_some())
            .collect();
        eligible.sort_by(|a, b| a.id.cmp(&b.id));

        let windows: HashMap<&str, BTreeMap<String, SegmentWindow>> = eligible
            .iter()
            .map(|convoy| {
                let by_segment = segment_windows(convoy)
                    .into_iter()
                    .map(|w| (w.segment_id.clone(), w))
                    .collect();
                (convoy.id.as_str(), by_segment)
            })
            .collect();

        let mut candidates = Vec::new();
        for (i, a) in eligible.iter().enumerate() {
            for b in &eligible[i + 1..] {
                if let Some(candidate) = self.evaluate(a, b, &windows) {
                    candidates.push(candidate);
                }
            }
        }

        let mut best: BTreeMap<String, MergeSuggestion> = BTreeMap::new();
        for candidate in &candidates {
            for (own, partner) in [(&candidate.a, &candidate.b), (&candidate.b, &candidate.a)] {
                let suggestion = MergeSuggestion {
                    with_convoy_id: partner.clone(),
                    payload_savings_tons: candidate.savings,
                    confidence: candidate.confidence,
                };
                let replace = match best.get(own) {
                    None => true,
                    Some(current) => {
                        suggestion.payload_savings_tons > current.payload_savings_tons
                            || (suggestion.payload_savings_tons == current.payload_savings_tons
                                && suggestion.with_convoy_id < current.with_convoy_id)
                    }
                };
                if replace {
                    best.insert(own.clone(), suggestion);
                }
            }
        }

        if !best.is_empty() {
            tracing::debug!(suggestions = best.len(), "Merge advisory pass complete");
        }
        best.into_iter().collect()
    }

    fn evaluate(
        &self,
        a: &Convoy,
        b: &Convoy,
        windows: &HashMap<&str, BTreeMap<String, SegmentWindow>>,
    ) -> Option<Candidate> {
        let combined = u64::from(a.vehicle_count) + u64::from(b.vehicle_count);
        if combined > u64::from(self.rules.road_space_quota) {
            return None;
        }
        let (route_a, route_b) = (a.assigned_route.as_ref()?, b.assigned_route.as_ref()?);
        let (windows_a, windows_b) = (windows.get(a.id.as_str())?, windows.get(b.id.as_str())?);

        let mut shared_km = 0.0;
        let mut best_overlap: f64 = 0.0;
        let mut offsets = Vec::new();
        for segment in &route_a.segments {
            let (Some(wa), Some(wb)) = (windows_a.get(&segment.id), windows_b.get(&segment.id))
            else {
                continue;
            };
            shared_km += segment.length_km();

            let shorter = wa.duration_hours().min(wb.duration_hours());
            if shorter > 0.0 {
                let overlap = interval_overlap(
                    (0.0, wa.duration_hours()),
                    (
                        hours_between(wa.entry, wb.entry),
                        hours_between(wa.entry, wb.exit),
                    ),
                );
                best_overlap = best_overlap.max(overlap / shorter);
            }
            let entry_offset = hours_between(wa.entry, wb.entry);
            let exit_offset = hours_between(wa.exit, wb.exit);
            offsets.push((entry_offset.powi(2) + exit_offset.powi(2)) / 2.0);
        }
        if offsets.is_empty() || best_overlap <= self.rules.merge_min_overlap {
            return None;
        }

        let shorter_km = route_a.distance_km.min(route_b.distance_km);
        let fraction = if shorter_km > 0.0 {
            (shared_km / shorter_km).min(1.0)
        } else {
            0.0
        };
        let savings = self.rules.tons_per_vehicle * combined as f64 * fraction;
        let variance = offsets.iter().sum::<f64>() / offsets.len() as f64;
        let confidence = (1.0 / (1.0 + variance)).clamp(0.0, 1.0);

        Some(Candidate {
            a: a.id.clone(),
            b: b.id.clone(),
            savings: (savings * 10.0).round() / 10.0,
            confidence: (confidence * 100.0).round() / 100.0,
        })
    }
}
