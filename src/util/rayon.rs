use crate::model::error::{SensiError, SensiResult};

pub fn create_pool(num_threads: usize) -> SensiResult<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("phylosens-{}", i))
        .build()
        .map_err(SensiError::RayonError)
}
