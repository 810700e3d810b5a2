use std::borrow::Cow;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::method::matching::Matched;
use crate::model::dataset::Dataset;
use crate::model::error::{SensiError, SensiResult};
use crate::model::fit::{FitFailure, ModelOptions, PhyloFitter};
use crate::model::formula::ModelSpec;
use crate::model::job::{Change, Job};
use crate::model::result::{FailedVariant, FullModelEstimate, IterationResult};
use crate::model::tree::Tree;
use crate::stats::deviation::calc_deviations;
use crate::util::progress::Progress;

/// Fit the matched data once. Without this baseline there is nothing to compare to.
pub fn fit_full_model(
    spec: &ModelSpec,
    matched: &Matched,
    fitter: &dyn PhyloFitter,
    options: &ModelOptions,
) -> SensiResult<FullModelEstimate> {
    let fit = fitter
        .fit(spec, &matched.data, matched.tree(), options)
        .map_err(SensiError::FullModelFitFailed)?;
    info!(
        "Full model fitted on {} taxa (AIC {:.3}, phylogenetic parameter {:.3}).",
        matched.data.len(),
        fit.aic,
        fit.phylo_param
    );
    Ok(FullModelEstimate { n_taxa: matched.data.len(), fit })
}

/// Successful refits and the ledger of variants that could not be refitted.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub results: Vec<IterationResult>,
    pub failures: Vec<FailedVariant>,
}

/// Everything a refit needs, shared read-only across workers.
pub struct Refitter<'a> {
    pub spec: &'a ModelSpec,
    pub matched: &'a Matched,
    pub fitter: &'a dyn PhyloFitter,
    pub options: &'a ModelOptions,
    pub baseline: &'a FullModelEstimate,
    pub progress: &'a dyn Progress,
}

impl Refitter<'_> {
    /// The data and tree a job describes.
    pub fn materialise<'j>(&'j self, job: &'j Job) -> Result<(Cow<'j, Dataset>, Cow<'j, Tree>), FitFailure> {
        match &job.change {
            Change::Remove(taxa) => {
                let tree = self.matched.tree().prune(taxa).map_err(|e| FitFailure::Prune(e.to_string()))?;
                let data = self.matched.data.without(taxa).map_err(|e| FitFailure::Prune(e.to_string()))?;
                Ok((Cow::Owned(data), Cow::Owned(tree)))
            }
            Change::Tree(index) => {
                let tree = self
                    .matched
                    .phylogeny
                    .trees()
                    .get(*index)
                    .ok_or_else(|| FitFailure::Prune(format!("no tree at index {}", index)))?;
                Ok((Cow::Borrowed(&self.matched.data), Cow::Borrowed(tree)))
            }
            Change::Values(data) => Ok((Cow::Borrowed(data), Cow::Borrowed(self.matched.tree()))),
        }
    }

    pub fn fit_job(&self, job: &Job) -> Result<IterationResult, FailedVariant> {
        let attempt = self.materialise(job).and_then(|(data, tree)| {
            let fit = self.fitter.fit(self.spec, &data, &tree, self.options)?;
            Ok((data.len(), fit))
        });
        match attempt {
            Ok((n_taxa, fit)) => {
                let deviations = calc_deviations(&self.baseline.fit, &fit);
                debug!("Refitted {} on {} taxa.", job.id, n_taxa);
                Ok(IterationResult { id: job.id.clone(), n_taxa, fit, deviations })
            }
            Err(e) => Err(FailedVariant { id: job.id.clone(), reason: e.to_string() }),
        }
    }

    /// Refit every job on the pool. Failures are recorded, never raised.
    pub fn run(&self, jobs: &[Job], pool: &rayon::ThreadPool) -> RunOutcome {
        self.progress.start(jobs.len());
        let attempts: Vec<Result<IterationResult, FailedVariant>> = pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    let attempt = self.fit_job(job);
                    self.progress.inc();
                    attempt
                })
                .collect()
        });
        self.progress.finish();

        let mut outcome = RunOutcome::default();
        for attempt in attempts {
            match attempt {
                Ok(result) => outcome.results.push(result),
                Err(failed) => {
                    warn!("Unable to refit {}: {}", failed.id, failed.reason);
                    outcome.failures.push(failed);
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
pub struct FailFor<F> {
    pub inner: F,
    pub taxon: String,
}

#[cfg(test)]
impl<F: PhyloFitter> PhyloFitter for FailFor<F> {
    fn fit(
        &self,
        spec: &ModelSpec,
        data: &Dataset,
        tree: &Tree,
        options: &ModelOptions,
    ) -> Result<crate::model::fit::ModelFit, FitFailure> {
        if data.taxa.iter().all(|t| t.0 != self.taxon) {
            return Err(FitFailure::NonConvergence(format!("injected failure without {}", self.taxon)));
        }
        self.inner.fit(spec, data, tree, options)
    }
}

#[test]
fn test_run_isolates_failures() {
    use crate::method::generator::leave_one_out;
    use crate::method::matching::match_data_tree;
    use crate::model::job::VariantId;
    use crate::model::tree::Phylogeny;
    use crate::stats::gls::PhyloGls;
    use crate::util::fixtures::{balanced_tree, linear_dataset, linear_spec, species};
    use crate::util::progress::NoProgress;
    use crate::util::rayon::create_pool;

    let names = species(8);
    let spec = linear_spec();
    let matched = match_data_tree(&spec, &linear_dataset(&names), &Phylogeny::Single(balanced_tree(&names))).unwrap();
    let options = ModelOptions::default();
    let fitter = FailFor { inner: PhyloGls, taxon: "sp3".to_string() };
    let baseline = fit_full_model(&spec, &matched, &fitter, &options).unwrap();

    let refitter = Refitter {
        spec: &spec,
        matched: &matched,
        fitter: &fitter,
        options: &options,
        baseline: &baseline,
        progress: &NoProgress,
    };
    let jobs = leave_one_out(&matched.data);
    let outcome = refitter.run(&jobs, &create_pool(2).unwrap());

    assert_eq!(outcome.results.len(), 7);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].id, VariantId::Species { taxon: "sp3".to_string() });
    for result in &outcome.results {
        assert_eq!(result.n_taxa, 7);
        assert_eq!(result.deviations.len(), 2);
    }
}

#[test]
fn test_prune_failure_is_recorded() {
    use crate::method::matching::match_data_tree;
    use crate::model::job::VariantId;
    use crate::model::tree::Phylogeny;
    use crate::stats::gls::PhyloGls;
    use crate::util::fixtures::{balanced_tree, linear_dataset, linear_spec, species};
    use crate::util::progress::NoProgress;

    let names = species(4);
    let spec = linear_spec();
    let matched = match_data_tree(&spec, &linear_dataset(&names), &Phylogeny::Single(balanced_tree(&names))).unwrap();
    let options = ModelOptions::default();
    let baseline = fit_full_model(&spec, &matched, &PhyloGls, &options).unwrap();
    let refitter = Refitter {
        spec: &spec,
        matched: &matched,
        fitter: &PhyloGls,
        options: &options,
        baseline: &baseline,
        progress: &NoProgress,
    };

    let job = Job::new(VariantId::Sample { fraction: 0.75, repetition: 0 }, Change::Remove(matched.data.taxa[..3].to_vec()));
    let failed = refitter.fit_job(&job).unwrap_err();
    assert!(failed.reason.starts_with("prune failed"));
}
