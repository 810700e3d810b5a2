use log::info;
use rand::rngs::StdRng;

use crate::method::generator::{sample_taxa, CladeJob};
use crate::method::runner::{Refitter, RunOutcome};
use crate::model::dataset::Dataset;
use crate::model::job::{Change, Job, VariantId};
use crate::model::result::NullSample;

/// `times` random removals per clade, each the same size as the clade and drawn from
/// every matched taxon.
pub fn null_jobs(data: &Dataset, clades: &[CladeJob], times: usize, rng: &mut StdRng) -> Vec<Job> {
    let mut out = Vec::with_capacity(clades.len() * times);
    for clade in clades {
        for draw in 0..times {
            let removed = sample_taxa(data, clade.size, rng);
            let id = VariantId::Null { clade: clade.clade.clone(), size: clade.size, draw };
            out.push(Job::new(id, Change::Remove(removed)));
        }
    }
    out
}

/// Refit the null draws. Failed draws join the failure ledger like any other variant.
pub fn run_null_distribution(
    refitter: &Refitter,
    clades: &[CladeJob],
    times: usize,
    rng: &mut StdRng,
    pool: &rayon::ThreadPool,
) -> (Vec<NullSample>, RunOutcome) {
    let jobs = null_jobs(&refitter.matched.data, clades, times, rng);
    info!("Building null distributions from {} size-matched removals.", jobs.len());
    let mut outcome = refitter.run(&jobs, pool);

    let mut samples = Vec::with_capacity(outcome.results.len());
    for result in std::mem::take(&mut outcome.results) {
        if let VariantId::Null { clade, size, .. } = &result.id {
            samples.push(NullSample { clade: clade.clone(), size: *size, result });
        }
    }
    (samples, outcome)
}

/// Deviations of one term across the null samples of one clade.
pub fn null_deviations(samples: &[NullSample], clade: &str, term: &str) -> Vec<f64> {
    samples
        .iter()
        .filter(|s| s.clade == clade)
        .filter_map(|s| s.result.deviation(term).map(|d| d.absolute))
        .filter(|d| d.is_finite())
        .collect()
}

#[test]
fn test_null_jobs_match_clade_size() {
    use crate::method::generator::leave_clade_out;
    use crate::model::dataset::Column;
    use crate::util::fixtures::{linear_dataset, species};
    use rand::SeedableRng;

    let names = species(12);
    let mut data = linear_dataset(&names);
    let labels = (0..12).map(|i| Some((if i < 4 { "a" } else { "b" }).to_string())).collect();
    data.columns.insert("family".to_string(), Column::Categorical(labels));

    let clades = leave_clade_out(&data, "family", 4).unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let jobs = null_jobs(&data, &clades, 10, &mut rng);
    assert_eq!(jobs.len(), 20);
    assert!(jobs[..10].iter().all(|j| j.removed().len() == 4));
    assert!(jobs[10..].iter().all(|j| j.removed().len() == 8));
    assert_eq!(jobs[3].id, VariantId::Null { clade: "a".to_string(), size: 4, draw: 3 });
}
