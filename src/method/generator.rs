use std::collections::BTreeMap;

use log::{debug, warn};
use phylodm::tree::Taxon;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::Rng;
use rand_distr::{Distribution as _, Normal, Uniform};

use crate::method::matching::Matched;
use crate::model::dataset::Dataset;
use crate::model::error::{SensiError, SensiResult};
use crate::model::formula::ModelSpec;
use crate::model::job::{Change, Job, VariantId};
use crate::model::params::{Distribution, Plan, DEFAULT_TREE_TIMES};

/// Enumerate the variants a plan asks for. Nothing is fitted here.
pub fn generate_jobs(plan: &Plan, spec: &ModelSpec, matched: &Matched, rng: &mut StdRng) -> SensiResult<Vec<Job>> {
    let jobs = match plan {
        Plan::Influence { .. } => leave_one_out(&matched.data),
        Plan::Sampling { breaks, times } => leave_fraction_out(&matched.data, breaks, *times, rng),
        Plan::Clade { column, min_size, .. } => {
            leave_clade_out(&matched.data, column, *min_size)?.into_iter().map(|c| c.job).collect()
        }
        Plan::Tree { times } => {
            if !matched.phylogeny.is_ensemble() {
                return Err(SensiError::InvalidPlan("tree resampling requires a tree ensemble".to_string()));
            }
            resample_trees(matched.phylogeny.trees().len(), times.unwrap_or(DEFAULT_TREE_TIMES), rng)
        }
        Plan::Intraspecific { times, distribution } => {
            resample_values(&matched.data, spec, *times, *distribution, rng)?
        }
    };
    debug!("Generated {} variants.", jobs.len());
    Ok(jobs)
}

/// One variant per taxon, in data order.
pub fn leave_one_out(data: &Dataset) -> Vec<Job> {
    data.taxa
        .iter()
        .map(|t| Job::new(VariantId::Species { taxon: t.0.clone() }, Change::Remove(vec![t.clone()])))
        .collect()
}

/// Draw `k` distinct taxa, returned in data order.
pub fn sample_taxa(data: &Dataset, k: usize, rng: &mut StdRng) -> Vec<Taxon> {
    let mut rows = index::sample(rng, data.len(), k.min(data.len())).into_vec();
    rows.sort_unstable();
    rows.into_iter().map(|i| data.taxa[i].clone()).collect()
}

/// For each break and each repetition, remove `round(fraction * N)` random taxa.
pub fn leave_fraction_out(data: &Dataset, breaks: &[f64], times: usize, rng: &mut StdRng) -> Vec<Job> {
    let n = data.len();
    let mut out = Vec::with_capacity(breaks.len() * times);
    for &fraction in breaks {
        let k = (fraction * n as f64).round() as usize;
        for repetition in 0..times {
            let removed = sample_taxa(data, k, rng);
            out.push(Job::new(VariantId::Sample { fraction, repetition }, Change::Remove(removed)));
        }
    }
    out
}

pub struct CladeJob {
    pub clade: String,
    pub size: usize,
    pub job: Job,
}

/// One variant per clade with at least `min_size` members, clades in name order.
pub fn leave_clade_out(data: &Dataset, column: &str, min_size: usize) -> SensiResult<Vec<CladeJob>> {
    let labels = data.categorical(column).map_err(|e| match e {
        SensiError::MissingColumn(c) => SensiError::MissingColumn(c),
        _ => SensiError::InvalidPlan(format!("clade column '{}' must be categorical", column)),
    })?;

    let mut clades: BTreeMap<&str, Vec<Taxon>> = BTreeMap::new();
    for (taxon, label) in data.taxa.iter().zip(labels) {
        if let Some(label) = label {
            clades.entry(label.as_str()).or_default().push(taxon.clone());
        }
    }

    let largest = clades.values().map(Vec::len).max().unwrap_or(0);
    let out: Vec<CladeJob> = clades
        .into_iter()
        .filter(|(_, members)| members.len() >= min_size)
        .map(|(clade, members)| CladeJob {
            clade: clade.to_string(),
            size: members.len(),
            job: Job::new(VariantId::Clade { clade: clade.to_string() }, Change::Remove(members)),
        })
        .collect();

    if out.is_empty() {
        return Err(SensiError::NoQualifyingClade { column: column.to_string(), min_size, largest });
    }
    Ok(out)
}

/// Pick `times` members of an ensemble of `n_trees`, without replacement unless more
/// draws are requested than there are trees.
pub fn resample_trees(n_trees: usize, times: usize, rng: &mut StdRng) -> Vec<Job> {
    let picks: Vec<usize> = if times <= n_trees {
        index::sample(rng, n_trees, times).into_vec()
    } else {
        warn!("Requested {} trees from an ensemble of {}, sampling with replacement.", times, n_trees);
        (0..times).map(|_| rng.gen_range(0..n_trees)).collect()
    };
    picks
        .into_iter()
        .enumerate()
        .map(|(repetition, tree)| Job::new(VariantId::Tree { tree, repetition }, Change::Tree(tree)))
        .collect()
}

/// Redraw every variable with an uncertainty column from the chosen distribution.
/// Values with a missing, zero or invalid uncertainty are kept as observed.
pub fn resample_values(
    data: &Dataset,
    spec: &ModelSpec,
    times: usize,
    distribution: Distribution,
    rng: &mut StdRng,
) -> SensiResult<Vec<Job>> {
    let mut uncertain: Vec<(&str, &[Option<f64>], &[Option<f64>])> = Vec::new();
    for variable in spec.variables() {
        if let Some(u) = &variable.uncertainty {
            uncertain.push((variable.column.as_str(), data.continuous(&variable.column)?, data.continuous(u)?));
        }
    }
    if uncertain.is_empty() {
        return Err(SensiError::InvalidPlan("no model variable declares an uncertainty column".to_string()));
    }

    let n_invalid = uncertain
        .iter()
        .flat_map(|(_, values, sds)| values.iter().zip(sds.iter()))
        .filter(|(value, sd)| matches!((value, sd), (Some(v), Some(s)) if *s != 0.0 && !perturbable(*v, *s)))
        .count();
    if n_invalid > 0 {
        warn!("{} observations cannot be perturbed by their uncertainty and are left unchanged.", n_invalid);
    }

    let mut out = Vec::with_capacity(times);
    for repetition in 0..times {
        let mut variant = data.clone();
        for (column, values, sds) in &uncertain {
            let drawn = values
                .iter()
                .zip(sds.iter())
                .map(|(value, sd)| draw_value(*value, *sd, distribution, rng))
                .collect::<SensiResult<Vec<_>>>()?;
            variant.set_continuous(column, drawn)?;
        }
        out.push(Job::new(VariantId::Resample { repetition }, Change::Values(variant)));
    }
    Ok(out)
}

/// A draw needs a finite observation and an interval around it that is non-empty in f64.
fn perturbable(v: f64, s: f64) -> bool {
    v.is_finite() && s.is_finite() && s > 0.0 && v - s < v + s
}

fn draw_value(value: Option<f64>, sd: Option<f64>, distribution: Distribution, rng: &mut StdRng) -> SensiResult<Option<f64>> {
    let (v, s) = match (value, sd) {
        (Some(v), Some(s)) if perturbable(v, s) => (v, s),
        _ => return Ok(value),
    };
    let drawn = match distribution {
        Distribution::Normal => Normal::new(v, s).map_err(|e| SensiError::Error(e.to_string()))?.sample(rng),
        Distribution::Uniform => Uniform::new(v - s, v + s).sample(rng),
    };
    Ok(Some(drawn))
}

#[cfg(test)]
fn matched_fixture(n: usize) -> Matched {
    use crate::method::matching::match_data_tree;
    use crate::model::tree::Phylogeny;
    use crate::util::fixtures::{balanced_tree, linear_dataset, linear_spec, species};

    let names = species(n);
    match_data_tree(&linear_spec(), &linear_dataset(&names), &Phylogeny::Single(balanced_tree(&names))).unwrap()
}

#[test]
fn test_leave_one_out_covers_every_taxon() {
    use std::collections::HashSet;

    let matched = matched_fixture(12);
    let jobs = leave_one_out(&matched.data);
    assert_eq!(jobs.len(), 12);
    let removed: HashSet<&Taxon> = jobs
        .iter()
        .map(|j| {
            assert_eq!(j.removed().len(), 1);
            &j.removed()[0]
        })
        .collect();
    assert_eq!(removed, matched.data.taxa.iter().collect());
    assert_eq!(jobs[0].id, VariantId::Species { taxon: matched.data.taxa[0].0.clone() });
}

#[test]
fn test_leave_fraction_out_sizes() {
    use rand::SeedableRng;
    use std::collections::HashSet;

    let matched = matched_fixture(20);
    let mut rng = StdRng::seed_from_u64(7);
    let jobs = leave_fraction_out(&matched.data, &[0.1, 0.25], 4, &mut rng);
    assert_eq!(jobs.len(), 8);
    for job in &jobs[..4] {
        assert_eq!(job.removed().len(), 2);
    }
    for job in &jobs[4..] {
        assert_eq!(job.removed().len(), 5);
        let unique: HashSet<&Taxon> = job.removed().iter().collect();
        assert_eq!(unique.len(), 5);
    }
}

#[test]
fn test_leave_clade_out_respects_minimum() {
    use crate::model::dataset::Column;

    let mut matched = matched_fixture(10);
    let labels = (0..10)
        .map(|i| Some((if i < 6 { "big" } else if i < 9 { "small" } else { "single" }).to_string()))
        .collect();
    matched.data.columns.insert("family".to_string(), Column::Categorical(labels));

    let clades = leave_clade_out(&matched.data, "family", 3).unwrap();
    let names: Vec<&str> = clades.iter().map(|c| c.clade.as_str()).collect();
    assert_eq!(names, vec!["big", "small"]);
    assert_eq!(clades[0].size, 6);
    assert_eq!(clades[1].job.removed().len(), 3);

    let err = leave_clade_out(&matched.data, "family", 7).err().unwrap();
    assert!(matches!(err, SensiError::NoQualifyingClade { largest: 6, min_size: 7, .. }));
}

#[test]
fn test_resample_trees() {
    use rand::SeedableRng;
    use std::collections::HashSet;

    let mut rng = StdRng::seed_from_u64(3);
    let jobs = resample_trees(10, 5, &mut rng);
    assert_eq!(jobs.len(), 5);
    let picked: HashSet<usize> = jobs
        .iter()
        .map(|j| match j.change {
            Change::Tree(i) => i,
            _ => panic!("expected a tree change"),
        })
        .collect();
    assert_eq!(picked.len(), 5);
    assert!(picked.iter().all(|&i| i < 10));

    let jobs = resample_trees(2, 6, &mut rng);
    assert_eq!(jobs.len(), 6);
}

#[test]
fn test_resample_values_keeps_certain_values() {
    use crate::model::formula::Variable;
    use rand::SeedableRng;

    let mut matched = matched_fixture(6);
    let sd = vec![Some(0.0), None, Some(0.5), Some(0.5), Some(-1.0), Some(0.2)];
    matched.data.set_continuous("y_sd", sd).unwrap();
    let spec = ModelSpec::new(Variable::new("y").with_uncertainty("y_sd"), vec![Variable::new("x")]);
    let observed = matched.data.continuous("y").unwrap().to_vec();

    for distribution in [Distribution::Normal, Distribution::Uniform] {
        let mut rng = StdRng::seed_from_u64(11);
        let jobs = resample_values(&matched.data, &spec, 25, distribution, &mut rng).unwrap();
        assert_eq!(jobs.len(), 25);
        for job in &jobs {
            let Change::Values(data) = &job.change else { panic!("expected new values") };
            let drawn = data.continuous("y").unwrap();
            assert_eq!(drawn[0], observed[0]);
            assert_eq!(drawn[1], observed[1]);
            assert_eq!(drawn[4], observed[4]);
            assert_eq!(data.continuous("x").unwrap(), matched.data.continuous("x").unwrap());
            if distribution == Distribution::Uniform {
                let (v, s) = (observed[2].unwrap(), 0.5);
                assert!(drawn[2].unwrap() >= v - s && drawn[2].unwrap() < v + s);
            }
        }
    }
}

#[test]
fn test_resample_values_keeps_unperturbable_values() {
    use crate::model::formula::Variable;
    use rand::SeedableRng;

    let mut matched = matched_fixture(6);
    let values = vec![Some(1e6), Some(f64::INFINITY), Some(1e6), Some(2.0), Some(f64::NAN), Some(3.0)];
    matched.data.set_continuous("y", values).unwrap();
    let sd = vec![Some(1e-11), Some(0.5), Some(1e-11), Some(0.5), Some(0.5), Some(0.5)];
    matched.data.set_continuous("y_sd", sd).unwrap();
    let spec = ModelSpec::new(Variable::new("y").with_uncertainty("y_sd"), vec![Variable::new("x")]);
    let observed = matched.data.continuous("y").unwrap().to_vec();

    for distribution in [Distribution::Normal, Distribution::Uniform] {
        let mut rng = StdRng::seed_from_u64(5);
        let jobs = resample_values(&matched.data, &spec, 10, distribution, &mut rng).unwrap();
        for job in &jobs {
            let Change::Values(data) = &job.change else { panic!("expected new values") };
            let drawn = data.continuous("y").unwrap();
            assert_eq!(drawn[0], observed[0]);
            assert_eq!(drawn[1], observed[1]);
            assert_eq!(drawn[2], observed[2]);
            assert!(drawn[4].unwrap().is_nan());
            assert!(drawn[3].unwrap().is_finite());
        }
    }
}

#[test]
fn test_resample_values_requires_uncertainty() {
    use crate::util::fixtures::linear_spec;
    use rand::SeedableRng;

    let matched = matched_fixture(6);
    let mut rng = StdRng::seed_from_u64(1);
    let result = resample_values(&matched.data, &linear_spec(), 3, Distribution::Normal, &mut rng);
    assert!(matches!(result, Err(SensiError::InvalidPlan(_))));
}
