use crate::method::generator::CladeJob;
use crate::method::null_dist::null_deviations;
use crate::model::job::VariantId;
use crate::model::result::{
    BreakSummary, BreakTermStats, CladeSummary, CladeTermTest, CladeTest, EstimateSummary, FailedVariant,
    FullModelEstimate, InfluenceRecord, InfluenceSummary, IterationResult, NullSample, SamplingSummary,
    TermDistribution, TermRanking,
};
use crate::ndarray::sort::argsort_by_abs_desc;
use crate::stats::deviation::{calc_randomization_p_value, calc_standardized};
use crate::stats::vec::{calc_mean, calc_quantile, calc_sample_stddev};

fn terms(baseline: &FullModelEstimate) -> Vec<&str> {
    baseline.fit.coefficients.iter().map(|c| c.term.as_str()).collect()
}

fn absolute_deviations(results: &[&IterationResult], term: &str) -> Vec<f64> {
    results.iter().map(|r| r.deviation(term).map_or(f64::NAN, |d| d.absolute)).collect()
}

fn percent_significant(results: &[&IterationResult], term: &str, alpha: f64) -> f64 {
    let n_significant = results.iter().filter(|r| r.p_value(term).is_some_and(|p| p < alpha)).count();
    100.0 * n_significant as f64 / results.len() as f64
}

/// Standardise each leave-one-out deviation by the spread of all of them, and rank
/// the taxa beyond the cutoff.
pub fn summarize_influence(baseline: &FullModelEstimate, results: &[IterationResult], cutoff: f64) -> InfluenceSummary {
    let species: Vec<(&str, &IterationResult)> = results
        .iter()
        .filter_map(|r| match &r.id {
            VariantId::Species { taxon } => Some((taxon.as_str(), r)),
            _ => None,
        })
        .collect();
    let fits: Vec<&IterationResult> = species.iter().map(|(_, r)| *r).collect();

    let mut records = Vec::new();
    let mut influential = Vec::new();
    for term in terms(baseline) {
        let deviations = absolute_deviations(&fits, term);
        let standardized = calc_standardized(&deviations);

        for (((taxon, _), &deviation), &z) in species.iter().zip(&deviations).zip(&standardized) {
            records.push(InfluenceRecord {
                taxon: taxon.to_string(),
                term: term.to_string(),
                deviation,
                standardized: z,
                influential: z.abs() > cutoff,
            });
        }

        let ranked = argsort_by_abs_desc(&standardized)
            .into_iter()
            .take_while(|&i| standardized[i].abs() > cutoff)
            .map(|i| species[i].0.to_string())
            .collect();
        influential.push(TermRanking { term: term.to_string(), ranked });
    }
    InfluenceSummary { cutoff, records, influential }
}

/// Per break: mean deviation, mean percent deviation and share of significant refits.
pub fn summarize_sampling(
    baseline: &FullModelEstimate,
    results: &[IterationResult],
    failures: &[FailedVariant],
    breaks: &[f64],
    alpha: f64,
) -> SamplingSummary {
    let n = baseline.n_taxa;
    let summaries = breaks
        .iter()
        .map(|&fraction| {
            let at_break: Vec<&IterationResult> = results
                .iter()
                .filter(|r| matches!(r.id, VariantId::Sample { fraction: f, .. } if f == fraction))
                .collect();
            let n_failed = failures
                .iter()
                .filter(|failed| matches!(failed.id, VariantId::Sample { fraction: f, .. } if f == fraction))
                .count();

            let terms = terms(baseline)
                .into_iter()
                .map(|term| {
                    let percents: Option<Vec<f64>> =
                        at_break.iter().map(|r| r.deviation(term).and_then(|d| d.percent)).collect();
                    BreakTermStats {
                        term: term.to_string(),
                        mean_deviation: calc_mean(&absolute_deviations(&at_break, term)),
                        mean_percent: percents.map(|p| calc_mean(&p)),
                        percent_significant: percent_significant(&at_break, term, alpha),
                    }
                })
                .collect();

            BreakSummary {
                fraction,
                n_removed: (fraction * n as f64).round() as usize,
                n_succeeded: at_break.len(),
                n_failed,
                terms,
            }
        })
        .collect();
    SamplingSummary { breaks: summaries }
}

/// Compare each clade's deviation against its size-matched null distribution.
/// Clades whose own refit failed are left out.
pub fn summarize_clades(
    baseline: &FullModelEstimate,
    results: &[IterationResult],
    clades: &[CladeJob],
    null_samples: &[NullSample],
    min_size: usize,
) -> CladeSummary {
    let mut tests = Vec::new();
    for clade in clades {
        let Some(result) = results.iter().find(|r| matches!(&r.id, VariantId::Clade { clade: c } if *c == clade.clade))
        else {
            continue;
        };
        let n_null = null_samples.iter().filter(|s| s.clade == clade.clade).count();

        let terms = result
            .deviations
            .iter()
            .map(|d| {
                let null = null_deviations(null_samples, &clade.clade, &d.term);
                let null_sd = calc_sample_stddev(&null);
                let standardized = d.absolute / null_sd;
                CladeTermTest {
                    term: d.term.clone(),
                    deviation: d.absolute,
                    percent: d.percent,
                    null_mean: calc_mean(&null),
                    null_sd,
                    standardized: standardized.is_finite().then_some(standardized),
                    p_value: calc_randomization_p_value(d.absolute, &null),
                }
            })
            .collect();
        tests.push(CladeTest { clade: clade.clade.clone(), size: clade.size, n_null, terms });
    }

    let ranking = terms(baseline)
        .into_iter()
        .map(|term| {
            let z: Vec<f64> = tests
                .iter()
                .map(|t| t.terms.iter().find(|x| x.term == term).and_then(|x| x.standardized).unwrap_or(f64::NAN))
                .collect();
            let ranked = argsort_by_abs_desc(&z)
                .into_iter()
                .filter(|&i| !z[i].is_nan())
                .map(|i| tests[i].clade.clone())
                .collect();
            TermRanking { term: term.to_string(), ranked }
        })
        .collect();

    CladeSummary { min_size, clades: tests, ranking }
}

/// Spread of every estimate across the refits, with a central 95% interval.
pub fn summarize_estimates(baseline: &FullModelEstimate, results: &[IterationResult], alpha: f64) -> EstimateSummary {
    let fits: Vec<&IterationResult> = results.iter().collect();
    let terms = terms(baseline)
        .into_iter()
        .map(|term| {
            let estimates: Vec<f64> = fits.iter().filter_map(|r| r.fit.estimate(term)).collect();
            let (min, max) = if estimates.is_empty() {
                (f64::NAN, f64::NAN)
            } else {
                estimates.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &e| (lo.min(e), hi.max(e)))
            };
            TermDistribution {
                term: term.to_string(),
                mean: calc_mean(&estimates),
                sd: calc_sample_stddev(&estimates),
                min,
                max,
                lower: calc_quantile(&estimates, 0.025),
                upper: calc_quantile(&estimates, 0.975),
                percent_significant: percent_significant(&fits, term, alpha),
            }
        })
        .collect();

    let aic: Vec<f64> = results.iter().map(|r| r.fit.aic).collect();
    let phylo_param: Vec<f64> = results.iter().map(|r| r.fit.phylo_param).collect();
    EstimateSummary { terms, mean_aic: calc_mean(&aic), mean_phylo_param: calc_mean(&phylo_param) }
}

#[cfg(test)]
fn fake_result(id: VariantId, slope: f64, p_value: f64, baseline: &FullModelEstimate) -> IterationResult {
    use crate::model::fit::{Coefficient, ModelFit};
    use crate::stats::deviation::calc_deviations;

    let fit = ModelFit {
        coefficients: vec![
            Coefficient { term: "(Intercept)".to_string(), estimate: 1.0, p_value: 0.5 },
            Coefficient { term: "x".to_string(), estimate: slope, p_value },
        ],
        aic: 20.0,
        phylo_param: 0.5,
    };
    let deviations = calc_deviations(&baseline.fit, &fit);
    IterationResult { id, n_taxa: 9, fit, deviations }
}

#[cfg(test)]
fn fake_baseline() -> FullModelEstimate {
    use crate::model::fit::{Coefficient, ModelFit};

    FullModelEstimate {
        n_taxa: 10,
        fit: ModelFit {
            coefficients: vec![
                Coefficient { term: "(Intercept)".to_string(), estimate: 1.0, p_value: 0.5 },
                Coefficient { term: "x".to_string(), estimate: 2.0, p_value: 0.01 },
            ],
            aic: 20.0,
            phylo_param: 0.5,
        },
    }
}

#[test]
fn test_summarize_influence_flags_outlier() {
    let baseline = fake_baseline();
    let mut slopes = vec![2.01, 1.99, 2.02, 1.98, 2.0, 2.01, 1.99, 2.0, 2.02, 1.98];
    slopes[4] = 3.0;
    let results: Vec<IterationResult> = slopes
        .iter()
        .enumerate()
        .map(|(i, &s)| fake_result(VariantId::Species { taxon: format!("sp{}", i) }, s, 0.01, &baseline))
        .collect();

    let summary = summarize_influence(&baseline, &results, 2.0);
    assert_eq!(summary.records.len(), 20);
    let slope = summary.influential.iter().find(|r| r.term == "x").unwrap();
    assert_eq!(slope.ranked, vec!["sp4".to_string()]);
    let intercept = summary.influential.iter().find(|r| r.term == "(Intercept)").unwrap();
    assert!(intercept.ranked.is_empty());
}

#[test]
fn test_summarize_sampling_counts() {
    let baseline = fake_baseline();
    let results = vec![
        fake_result(VariantId::Sample { fraction: 0.1, repetition: 0 }, 2.5, 0.01, &baseline),
        fake_result(VariantId::Sample { fraction: 0.1, repetition: 1 }, 1.5, 0.2, &baseline),
        fake_result(VariantId::Sample { fraction: 0.5, repetition: 0 }, 2.0, 0.01, &baseline),
    ];
    let failures = vec![FailedVariant {
        id: VariantId::Sample { fraction: 0.5, repetition: 1 },
        reason: "did not converge: test".to_string(),
    }];

    let summary = summarize_sampling(&baseline, &results, &failures, &[0.1, 0.5], 0.05);
    let first = &summary.breaks[0];
    assert_eq!((first.n_removed, first.n_succeeded, first.n_failed), (1, 2, 0));
    let slope = first.terms.iter().find(|t| t.term == "x").unwrap();
    assert_eq!(slope.mean_deviation, 0.0);
    assert_eq!(slope.mean_percent, Some(25.0));
    assert_eq!(slope.percent_significant, 50.0);
    let second = &summary.breaks[1];
    assert_eq!((second.n_removed, second.n_succeeded, second.n_failed), (5, 1, 1));
}

#[test]
fn test_summarize_estimates() {
    let baseline = fake_baseline();
    let results: Vec<IterationResult> = [1.0, 2.0, 3.0]
        .iter()
        .enumerate()
        .map(|(i, &s)| fake_result(VariantId::Resample { repetition: i }, s, if i == 0 { 0.5 } else { 0.01 }, &baseline))
        .collect();

    let summary = summarize_estimates(&baseline, &results, 0.05);
    let slope = summary.terms.iter().find(|t| t.term == "x").unwrap();
    assert_eq!(slope.mean, 2.0);
    assert_eq!(slope.sd, 1.0);
    assert_eq!((slope.min, slope.max), (1.0, 3.0));
    assert!(slope.lower > 1.0 && slope.lower < 1.1);
    assert!(slope.upper > 2.9 && slope.upper < 3.0);
    assert!((slope.percent_significant - 200.0 / 3.0).abs() < 1e-9);
    assert_eq!(summary.mean_aic, 20.0);
}
