use std::collections::BTreeMap;

use crate::config::StudyConfig;
use crate::record::{Category, ParticipantRecord, Status};

/// Yield used when neither history nor configuration says anything.
pub const FALLBACK_YIELD: f64 = 0.1;
/// Lower bound on an observed yield so the inverse weighting stays finite.
pub const MIN_YIELD: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum YieldSource {
    Historical { invited: usize, completed: usize },
    SiteOverride,
    CategoryOverride,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YieldEstimate {
    pub value: f64,
    pub source: YieldSource,
}

/// Estimate the completion rate of `category`.
///
/// Historical evidence always wins. Without any, a `<SITE>_<CATEGORY>_YIELD`
/// override beats `<CATEGORY>_YIELD`, which beats the fallback constant.
pub fn estimate(
    records: &[ParticipantRecord],
    category: Category,
    site: Option<&str>,
    config: &StudyConfig,
) -> YieldEstimate {
    let (invited, completed) = records
        .iter()
        .filter(|r| r.category == category && r.status.is_invited())
        .fold((0usize, 0usize), |(inv, comp), r| {
            (inv + 1, comp + usize::from(r.status == Status::Completed))
        });

    if invited > 0 {
        return YieldEstimate {
            value: (completed as f64 / invited as f64).max(MIN_YIELD),
            source: YieldSource::Historical { invited, completed },
        };
    }

    if let Some(site) = site {
        if let Some(v) = positive(config.get_f64(&format!("{}_{}_YIELD", site, category))) {
            return YieldEstimate {
                value: v,
                source: YieldSource::SiteOverride,
            };
        }
    }

    if let Some(v) = positive(config.get_f64(&format!("{}_YIELD", category))) {
        return YieldEstimate {
            value: v,
            source: YieldSource::CategoryOverride,
        };
    }

    YieldEstimate {
        value: FALLBACK_YIELD,
        source: YieldSource::Fallback,
    }
}

/// Yield estimates for every category.
pub fn estimate_all(
    records: &[ParticipantRecord],
    site: Option<&str>,
    config: &StudyConfig,
) -> BTreeMap<Category, YieldEstimate> {
    Category::ALL
        .iter()
        .map(|c| (*c, estimate(records, *c, site, config)))
        .collect()
}

/// Configured yields outside (0, 1] are ignored; a zero yield would blow up the weighting.
fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v > 0.0).map(|v| v.min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::record_in;

    fn config() -> StudyConfig {
        StudyConfig::default()
            .with_value("MGB_S1_YIELD", 0.4)
            .with_value("S1_YIELD", 0.3)
            .with_value("S2_YIELD", 0.25)
    }

    #[test]
    fn test_history_preempts_configuration() {
        let mut records: Vec<_> = (0..4)
            .map(|i| record_in(&format!("C{}", i), Category::S1))
            .collect();
        records[0].status = Status::Completed;
        records[1].status = Status::Pending;
        records[2].status = Status::Refused;

        let est = estimate(&records, Category::S1, Some("MGB"), &config());
        assert!((est.value - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(est.source, YieldSource::Historical { invited: 3, completed: 1 });
    }

    #[test]
    fn test_zero_completions_floor_at_minimum() {
        let mut records = vec![record_in("C1", Category::S3), record_in("C2", Category::S3)];
        records[0].status = Status::Pending;
        records[1].status = Status::Refused;
        let est = estimate(&records, Category::S3, None, &StudyConfig::default());
        assert_eq!(est.value, MIN_YIELD);
    }

    #[test]
    fn test_fallback_chain_without_history() {
        let records = vec![record_in("C1", Category::S1)];
        let cfg = config();

        let site = estimate(&records, Category::S1, Some("MGB"), &cfg);
        assert_eq!(site.value, 0.4);
        assert_eq!(site.source, YieldSource::SiteOverride);

        let other_site = estimate(&records, Category::S1, Some("VUMC"), &cfg);
        assert_eq!(other_site.value, 0.3);
        assert_eq!(other_site.source, YieldSource::CategoryOverride);

        let generic = estimate(&records, Category::S2, Some("MGB"), &cfg);
        assert_eq!(generic.value, 0.25);

        let none = estimate(&records, Category::S5, Some("MGB"), &cfg);
        assert_eq!(none.value, FALLBACK_YIELD);
        assert_eq!(none.source, YieldSource::Fallback);
    }

    #[test]
    fn test_other_categories_do_not_leak_into_history() {
        let mut records = vec![record_in("C1", Category::S2)];
        records[0].status = Status::Completed;
        let est = estimate(&records, Category::S1, None, &StudyConfig::default());
        assert_eq!(est.source, YieldSource::Fallback);
        assert_eq!(estimate_all(&records, None, &StudyConfig::default()).len(), 6);
    }
}
