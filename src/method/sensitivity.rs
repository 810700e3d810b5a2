use std::time::Instant;

use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::method::aggregate::{summarize_clades, summarize_estimates, summarize_influence, summarize_sampling};
use crate::method::generator::{generate_jobs, leave_clade_out};
use crate::method::matching::match_data_tree;
use crate::method::null_dist::run_null_distribution;
use crate::method::runner::{fit_full_model, Refitter};
use crate::model::dataset::Dataset;
use crate::model::error::SensiResult;
use crate::model::fit::PhyloFitter;
use crate::model::formula::ModelSpec;
use crate::model::job::Job;
use crate::model::params::{Params, Plan};
use crate::model::result::{AnalysisReport, AnalysisSummary};
use crate::model::tree::Phylogeny;
use crate::util::progress::Progress;
use crate::util::rayon::create_pool;

/// A model, its data and the phylogeny to test it against.
pub struct Sensitivity {
    pub spec: ModelSpec,
    pub data: Dataset,
    pub phylogeny: Phylogeny,
}

impl Sensitivity {
    pub fn new(spec: ModelSpec, data: Dataset, phylogeny: Phylogeny) -> Self {
        Self { spec, data, phylogeny }
    }

    pub fn run(&self, params: &Params, fitter: &dyn PhyloFitter, progress: &dyn Progress) -> SensiResult<AnalysisReport> {
        run_analysis(&self.spec, &self.data, &self.phylogeny, params, fitter, progress)
    }
}

/// Match, fit the full model, refit every variant the plan describes, then summarise.
/// Variant generation is sequential from `params.seed`, so the report does not depend
/// on the number of cpus.
pub fn run_analysis(
    spec: &ModelSpec,
    data: &Dataset,
    phylogeny: &Phylogeny,
    params: &Params,
    fitter: &dyn PhyloFitter,
    progress: &dyn Progress,
) -> SensiResult<AnalysisReport> {
    params.validate()?;

    let previous_time = Instant::now();
    let matched = match_data_tree(spec, data, phylogeny)?;
    let baseline = fit_full_model(spec, &matched, fitter, &params.options)?;
    info!("Matched data and fitted the full model in {:?}.", previous_time.elapsed());

    let mut rng = StdRng::seed_from_u64(params.seed);
    let (jobs, clades) = match &params.plan {
        Plan::Clade { column, min_size, .. } => {
            let clades = leave_clade_out(&matched.data, column, *min_size)?;
            let jobs: Vec<Job> = clades.iter().map(|c| c.job.clone()).collect();
            (jobs, clades)
        }
        plan => (generate_jobs(plan, spec, &matched, &mut rng)?, Vec::new()),
    };

    let pool = create_pool(params.cpus)?;
    let refitter = Refitter {
        spec,
        matched: &matched,
        fitter,
        options: &params.options,
        baseline: &baseline,
        progress,
    };

    let previous_time = Instant::now();
    info!("Refitting {} variants using {} cpus.", jobs.len(), params.cpus);
    let mut outcome = refitter.run(&jobs, &pool);
    info!("Refitted {} variants in {:?}.", jobs.len(), previous_time.elapsed());

    let mut null_samples = Vec::new();
    let summary = match &params.plan {
        Plan::Influence { cutoff } => {
            AnalysisSummary::Influence(summarize_influence(&baseline, &outcome.results, *cutoff))
        }
        Plan::Sampling { breaks, .. } => AnalysisSummary::Sampling(summarize_sampling(
            &baseline,
            &outcome.results,
            &outcome.failures,
            breaks,
            params.alpha,
        )),
        Plan::Clade { min_size, times, .. } => {
            let (samples, null_outcome) = run_null_distribution(&refitter, &clades, *times, &mut rng, &pool);
            outcome.failures.extend(null_outcome.failures);
            null_samples = samples;
            AnalysisSummary::Clade(summarize_clades(&baseline, &outcome.results, &clades, &null_samples, *min_size))
        }
        Plan::Tree { .. } => AnalysisSummary::Tree(summarize_estimates(&baseline, &outcome.results, params.alpha)),
        Plan::Intraspecific { .. } => {
            AnalysisSummary::Intraspecific(summarize_estimates(&baseline, &outcome.results, params.alpha))
        }
    };

    let n_succeeded = outcome.results.len() + null_samples.len();
    let n_failed = outcome.failures.len();
    info!("{} refits succeeded, {} failed.", n_succeeded, n_failed);

    Ok(AnalysisReport {
        params: params.clone(),
        matching: matched.report.clone(),
        baseline,
        results: outcome.results,
        null_samples,
        failures: outcome.failures,
        n_succeeded,
        n_failed,
        summary,
        inputs: Vec::new(),
    })
}

#[cfg(test)]
fn bm_params(plan: Plan) -> Params {
    use crate::model::fit::{EvolutionModel, ModelOptions};
    Params::new(plan).with_options(ModelOptions { model: EvolutionModel::BrownianMotion })
}

#[test]
fn test_influence_finds_outlier() {
    use crate::stats::gls::PhyloGls;
    use crate::util::fixtures::{balanced_tree, linear_dataset, linear_spec, species};
    use crate::util::progress::NoProgress;

    let names = species(20);
    let mut data = linear_dataset(&names);
    let mut y = data.continuous("y").unwrap().to_vec();
    y[19] = y[19].map(|v| v + 15.0);
    data.set_continuous("y", y).unwrap();

    let sensitivity = Sensitivity::new(linear_spec(), data, Phylogeny::Single(balanced_tree(&names)));
    let report = sensitivity.run(&bm_params(Plan::influence()).with_cpus(3), &PhyloGls, &NoProgress).unwrap();

    assert_eq!(report.results.len(), 20);
    assert!(report.is_complete());
    let AnalysisSummary::Influence(summary) = &report.summary else { panic!("expected an influence summary") };
    let top = summary
        .records
        .iter()
        .filter(|r| r.term == "x")
        .max_by(|a, b| a.standardized.abs().total_cmp(&b.standardized.abs()))
        .unwrap();
    assert_eq!(top.taxon, "sp20");
    assert!(top.influential);
}

#[test]
fn test_clade_against_null_distribution() {
    use crate::method::null_dist::null_deviations;
    use crate::model::dataset::Column;
    use crate::model::job::VariantId;
    use crate::stats::deviation::calc_randomization_p_value;
    use crate::stats::gls::PhyloGls;
    use crate::util::fixtures::{balanced_tree, linear_dataset, linear_spec, species};
    use crate::util::progress::NoProgress;

    let names = species(12);
    let mut data = linear_dataset(&names);
    let labels = (0..12).map(|i| Some((if i < 8 { "a" } else { "b" }).to_string())).collect();
    data.columns.insert("family".to_string(), Column::Categorical(labels));

    let params = bm_params(Plan::Clade { column: "family".to_string(), min_size: 5, times: 50 }).with_cpus(2);
    let report = run_analysis(
        &linear_spec(),
        &data,
        &Phylogeny::Single(balanced_tree(&names)),
        &params,
        &PhyloGls,
        &NoProgress,
    )
    .unwrap();

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].id, VariantId::Clade { clade: "a".to_string() });
    assert_eq!(report.null_samples.len(), 50);
    assert_eq!(report.n_failed, 0);
    assert!(report.null_samples.iter().all(|s| s.clade == "a" && s.size == 8 && s.result.n_taxa == 4));

    let AnalysisSummary::Clade(summary) = &report.summary else { panic!("expected a clade summary") };
    assert_eq!(summary.clades.len(), 1);
    let slope = summary.clades[0].terms.iter().find(|t| t.term == "x").unwrap();
    let null = null_deviations(&report.null_samples, "a", "x");
    assert_eq!(slope.p_value, calc_randomization_p_value(slope.deviation, &null));
}

#[test]
fn test_tree_ensemble_resampling() {
    use crate::model::job::VariantId;
    use crate::stats::gls::PhyloGls;
    use crate::util::fixtures::{balanced_tree, linear_dataset, linear_spec, species};
    use crate::util::progress::NoProgress;

    let names = species(10);
    let trees = (0..10)
        .map(|k| {
            let mut rotated = names.clone();
            rotated.rotate_left(k);
            balanced_tree(&rotated)
        })
        .collect();

    let report = run_analysis(
        &linear_spec(),
        &linear_dataset(&names),
        &Phylogeny::Ensemble(trees),
        &bm_params(Plan::Tree { times: Some(5) }),
        &PhyloGls,
        &NoProgress,
    )
    .unwrap();

    assert_eq!(report.results.len(), 5);
    assert!(report.results.iter().all(|r| matches!(r.id, VariantId::Tree { tree, .. } if tree < 10)));
    let AnalysisSummary::Tree(summary) = &report.summary else { panic!("expected a tree summary") };
    assert_eq!(summary.terms.len(), 2);
}

#[test]
fn test_tree_mode_requires_ensemble() {
    use crate::model::error::SensiError;
    use crate::stats::gls::PhyloGls;
    use crate::util::fixtures::{balanced_tree, linear_dataset, linear_spec, species};
    use crate::util::progress::NoProgress;

    let names = species(6);
    let result = run_analysis(
        &linear_spec(),
        &linear_dataset(&names),
        &Phylogeny::Single(balanced_tree(&names)),
        &bm_params(Plan::tree()),
        &PhyloGls,
        &NoProgress,
    );
    assert!(matches!(result, Err(SensiError::InvalidPlan(_))));
}

#[test]
fn test_failed_variant_is_isolated() {
    use crate::method::runner::FailFor;
    use crate::model::job::VariantId;
    use crate::stats::gls::PhyloGls;
    use crate::util::fixtures::{balanced_tree, linear_dataset, linear_spec, species};
    use crate::util::progress::NoProgress;

    let names = species(10);
    let fitter = FailFor { inner: PhyloGls, taxon: "sp5".to_string() };
    let report = run_analysis(
        &linear_spec(),
        &linear_dataset(&names),
        &Phylogeny::Single(balanced_tree(&names)),
        &bm_params(Plan::influence()).with_cpus(4),
        &fitter,
        &NoProgress,
    )
    .unwrap();

    assert_eq!(report.results.len(), 9);
    assert_eq!((report.n_succeeded, report.n_failed), (9, 1));
    assert_eq!(report.failures[0].id, VariantId::Species { taxon: "sp5".to_string() });
    assert!(!report.is_complete());
}

#[test]
fn test_sampling_is_reproducible_across_cpus() {
    use crate::stats::gls::PhyloGls;
    use crate::util::fixtures::{balanced_tree, linear_dataset, linear_spec, species};
    use crate::util::progress::NoProgress;

    let names = species(16);
    let data = linear_dataset(&names);
    let phylogeny = Phylogeny::Single(balanced_tree(&names));
    let plan = Plan::Sampling { breaks: vec![0.25], times: 6 };

    let run = |cpus: usize| {
        let params = bm_params(plan.clone()).with_seed(9).with_cpus(cpus);
        run_analysis(&linear_spec(), &data, &phylogeny, &params, &PhyloGls, &NoProgress).unwrap()
    };
    let (a, b) = (run(1), run(4));

    assert_eq!(a.results.len(), 6);
    for (ra, rb) in a.results.iter().zip(&b.results) {
        assert_eq!(ra.id, rb.id);
        assert_eq!(ra.fit.coefficients, rb.fit.coefficients);
    }
    let AnalysisSummary::Sampling(summary) = &a.summary else { panic!("expected a sampling summary") };
    assert_eq!(summary.breaks[0].n_removed, 4);
}

#[test]
fn test_intraspecific_resampling() {
    use crate::model::formula::Variable;
    use crate::model::params::Distribution;
    use crate::stats::gls::PhyloGls;
    use crate::util::fixtures::{balanced_tree, linear_dataset, species};
    use crate::util::progress::NoProgress;

    let names = species(10);
    let mut data = linear_dataset(&names);
    data.set_continuous("y_sd", vec![Some(0.1); 10]).unwrap();
    let spec = ModelSpec::new(Variable::new("y").with_uncertainty("y_sd"), vec![Variable::new("x")]);
    let plan = Plan::Intraspecific { times: 8, distribution: Distribution::Normal };

    let report =
        run_analysis(&spec, &data, &Phylogeny::Single(balanced_tree(&names)), &bm_params(plan), &PhyloGls, &NoProgress)
            .unwrap();
    assert_eq!(report.results.len(), 8);
    let AnalysisSummary::Intraspecific(summary) = &report.summary else { panic!("expected an estimate summary") };
    let slope = summary.terms.iter().find(|t| t.term == "x").unwrap();
    assert!((slope.mean - 2.0).abs() < 0.2);
    assert!(report.to_json().unwrap().contains("\"analysis\": \"intraspecific\""));
}
