//! Query pools for timestamps, occlusion and pipeline statistics.
//!
//! Queries are reset, begun and ended through the command recorder; this
//! module owns the pool and reads results back on the host.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

pub struct QueryPool {
    device: Arc<Device>,
    pool: vk::QueryPool,
    query_type: vk::QueryType,
    count: u32,
    statistics: vk::QueryPipelineStatisticFlags,
}

impl QueryPool {
    /// Creates a pool of `count` queries of `query_type`.
    ///
    /// `statistics` is only read for `PIPELINE_STATISTICS` pools.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty pool or if `vkCreateQueryPool` fails.
    pub fn new(
        device: Arc<Device>,
        query_type: vk::QueryType,
        count: u32,
        statistics: vk::QueryPipelineStatisticFlags,
    ) -> RhiResult<Self> {
        if count == 0 {
            return Err(RhiError::InvalidArgument("Query pool needs at least one query".into()));
        }
        let info = vk::QueryPoolCreateInfo::default()
            .query_type(query_type)
            .query_count(count)
            .pipeline_statistics(statistics);
        let pool = unsafe { device.handle().create_query_pool(&info, None)? };
        debug!("Created {:?} query pool with {} queries", query_type, count);
        Ok(Self {
            device,
            pool,
            query_type,
            count,
            statistics,
        })
    }

    /// Values written per query: one, or one per enabled statistic.
    pub fn values_per_query(&self) -> usize {
        if self.query_type == vk::QueryType::PIPELINE_STATISTICS {
            self.statistics.as_raw().count_ones() as usize
        } else {
            1
        }
    }

    /// Reads `count` queries starting at `first` as 64-bit values.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is out of bounds or the results cannot
    /// be read (`NOT_READY` when `flags` lacks `WAIT`).
    pub fn get_results(
        &self,
        first: u32,
        count: u32,
        flags: vk::QueryResultFlags,
    ) -> RhiResult<Vec<u64>> {
        if first.checked_add(count).is_none_or(|end| end > self.count) {
            return Err(RhiError::InvalidArgument(format!(
                "Queries {}..{} out of range for a pool of {}",
                first,
                first.saturating_add(count),
                self.count
            )));
        }
        let values = self.values_per_query();
        let mut data = vec![0u64; count as usize * values];
        let stride = (values * std::mem::size_of::<u64>()) as vk::DeviceSize;
        let device = self.device.handle();
        unsafe {
            (device.fp_v1_0().get_query_pool_results)(
                device.handle(),
                self.pool,
                first,
                count,
                data.len() * std::mem::size_of::<u64>(),
                data.as_mut_ptr().cast(),
                stride,
                flags | vk::QueryResultFlags::TYPE_64,
            )
            .result()?;
        }
        Ok(data)
    }

    /// Elapsed milliseconds between two timestamp values.
    pub fn timestamp_delta_ms(&self, begin: u64, end: u64) -> f64 {
        let period = self.device.limits().timestamp_period as f64;
        end.saturating_sub(begin) as f64 * period / 1_000_000.0
    }

    #[inline]
    pub fn handle(&self) -> vk::QueryPool {
        self.pool
    }

    #[inline]
    pub fn query_type(&self) -> vk::QueryType {
        self.query_type
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Drop for QueryPool {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_query_pool(self.pool, None) };
    }
}
