//! Aggregations over a metric's sample stream.
//!
//! Every aggregation is driven by a *scan*: a closure that runs one full pass
//! over the metric and feeds each sample to a visitor. Small populations are
//! buffered during the first pass and sorted in memory. Populations larger
//! than `limit` are never fully buffered; order statistics are then found by
//! [`select_ranks`], which re-runs the scan to narrow a value window around
//! each requested rank.

use std::collections::{BTreeMap, BTreeSet};

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::codec::Sample;
use crate::{Error, Result};

/// Percentiles reported by a summary, with their JSON names.
pub const SUMMARY_PERCENTILES: [(&str, f64); 6] = [
    ("p50", 0.5),
    ("p80", 0.8),
    ("p90", 0.9),
    ("p95", 0.95),
    ("p99", 0.99),
    ("p99.9", 0.999),
];

/// Upper percentile bounding the histogram range.
pub const HISTOGRAM_PERCENTILE: f64 = 0.99;

const SELECT_BUCKETS: usize = 1024;

/// How a percentile is read off the sorted population.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PercentileMethod {
    /// `sorted[max(floor(n * p) - 1, 0)]`.
    #[default]
    NearestRank,
    /// Linear interpolation at rank `k = (n - 1) * p`.
    Interpolated,
}

/// Ranks (0-based, into the sorted population) that determine one percentile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankSpan {
    pub lower: usize,
    pub upper: usize,
    /// Fractional rank for interpolation; equals `lower` for exact ranks.
    pub k: f64,
}

impl PercentileMethod {
    pub fn rank_span(self, n: usize, p: f64) -> RankSpan {
        debug_assert!(n > 0);
        match self {
            PercentileMethod::NearestRank => {
                let idx = if n > 1 {
                    ((n as f64 * p).floor() as usize).saturating_sub(1)
                } else {
                    0
                };
                let idx = idx.min(n - 1);
                RankSpan {
                    lower: idx,
                    upper: idx,
                    k: idx as f64,
                }
            }
            PercentileMethod::Interpolated => {
                let k = (n - 1) as f64 * p;
                let lower = (k.floor() as usize).min(n - 1);
                let upper = (k.ceil() as usize).min(n - 1);
                RankSpan { lower, upper, k }
            }
        }
    }

    /// Evaluate percentile `p` given access to the order statistics.
    pub fn evaluate(self, n: usize, p: f64, value_at: impl Fn(usize) -> f64) -> f64 {
        let span = self.rank_span(n, p);
        if span.lower == span.upper {
            return value_at(span.lower);
        }
        let (f, c) = (span.lower as f64, span.upper as f64);
        value_at(span.lower) * (c - span.k) + value_at(span.upper) * (span.k - f)
    }
}

/// Percentile of an already sorted slice, `None` when empty.
pub fn percentile(sorted: &[f64], p: f64, method: PercentileMethod) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    Some(method.evaluate(sorted.len(), p, |rank| sorted[rank]))
}

#[derive(Debug, Clone, Copy)]
struct Moments {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Moments {
    fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// First pass shared by summary and histogram: moments plus a value buffer
/// that is dropped as soon as the population outgrows `limit`.
struct ValuePass {
    moments: Moments,
    values: Option<Vec<f64>>,
    limit: usize,
}

impl ValuePass {
    fn new(limit: usize) -> Self {
        Self {
            moments: Moments::new(),
            values: Some(Vec::new()),
            limit,
        }
    }

    fn observe(&mut self, value: f64) {
        self.moments.observe(value);
        if let Some(values) = &mut self.values {
            if values.len() < self.limit {
                values.push(value);
            } else {
                self.values = None;
            }
        }
    }
}

/// Order statistics either from a sorted buffer or from targeted selection.
enum OrderStats {
    Sorted(Vec<f64>),
    Selected(BTreeMap<usize, f64>),
}

impl OrderStats {
    fn resolve<S>(
        values: Option<Vec<f64>>,
        moments: &Moments,
        scan: &mut S,
        method: PercentileMethod,
        percentiles: &[f64],
        limit: usize,
    ) -> Result<Self>
    where
        S: FnMut(&mut dyn FnMut(Sample)) -> Result<()>,
    {
        if let Some(mut values) = values {
            values.sort_by(|a, b| a.total_cmp(b));
            return Ok(OrderStats::Sorted(values));
        }

        let n = moments.count as usize;
        let mut ranks = BTreeSet::new();
        for &p in percentiles {
            let span = method.rank_span(n, p);
            ranks.insert(span.lower);
            ranks.insert(span.upper);
        }
        log::debug!(
            "selecting {} order statistics from {} samples without buffering",
            ranks.len(),
            n
        );
        let ranks: Vec<usize> = ranks.into_iter().collect();
        let selected = select_ranks(scan, moments.min, moments.max, &ranks, limit)?;
        Ok(OrderStats::Selected(selected))
    }

    fn at(&self, rank: usize) -> f64 {
        match self {
            OrderStats::Sorted(values) => values[rank],
            OrderStats::Selected(map) => map.get(&rank).copied().unwrap_or(f64::NAN),
        }
    }
}

enum Probe {
    Narrow { lo: f64, hi: f64, offset: u64 },
    Collect { lo: f64, hi: f64, offset: u64, values: Vec<f64> },
    Done(f64),
}

struct Tally {
    counts: Vec<u64>,
    mins: Vec<f64>,
    maxs: Vec<f64>,
}

impl Tally {
    fn new() -> Self {
        Self {
            counts: vec![0; SELECT_BUCKETS],
            mins: vec![f64::INFINITY; SELECT_BUCKETS],
            maxs: vec![f64::NEG_INFINITY; SELECT_BUCKETS],
        }
    }

    fn observe(&mut self, lo: f64, hi: f64, value: f64) {
        let idx = bucket_index(lo, hi, value);
        self.counts[idx] += 1;
        self.mins[idx] = self.mins[idx].min(value);
        self.maxs[idx] = self.maxs[idx].max(value);
    }

    fn narrow(&self, offset: u64, limit: usize) -> Result<Probe> {
        let mut before = 0u64;
        for (idx, &count) in self.counts.iter().enumerate() {
            if offset < before + count {
                let offset = offset - before;
                let (lo, hi) = (self.mins[idx], self.maxs[idx]);
                return Ok(if lo == hi {
                    Probe::Done(lo)
                } else if count as usize <= limit {
                    Probe::Collect {
                        lo,
                        hi,
                        offset,
                        values: Vec::with_capacity(count as usize),
                    }
                } else {
                    Probe::Narrow { lo, hi, offset }
                });
            }
            before += count;
        }
        Err(Error::InsufficientData("population changed between passes"))
    }
}

fn bucket_index(lo: f64, hi: f64, value: f64) -> usize {
    if hi <= lo {
        return 0;
    }
    // Halved to keep the span finite for extreme ranges.
    let pos = (value / 2.0 - lo / 2.0) / (hi / 2.0 - lo / 2.0) * SELECT_BUCKETS as f64;
    (pos as usize).min(SELECT_BUCKETS - 1)
}

/// Find the values at the given 0-based ranks of the sorted population
/// without holding more than `limit` values per rank.
///
/// Each round runs `scan` once. A rank's window starts at `[min, max]` and
/// shrinks to the bucket holding the rank until the bucket either holds a
/// single distinct value or fits in `limit`, in which case its values are
/// collected and sorted on the next pass. The window loses at least one of
/// its extreme values every round, so the loop terminates.
pub fn select_ranks<S>(
    scan: &mut S,
    min: f64,
    max: f64,
    ranks: &[usize],
    limit: usize,
) -> Result<BTreeMap<usize, f64>>
where
    S: FnMut(&mut dyn FnMut(Sample)) -> Result<()>,
{
    let limit = limit.max(1);
    let mut probes: Vec<Probe> = ranks
        .iter()
        .map(|&rank| {
            if min == max {
                Probe::Done(min)
            } else {
                Probe::Narrow {
                    lo: min,
                    hi: max,
                    offset: rank as u64,
                }
            }
        })
        .collect();

    let mut passes = 0u32;
    while probes.iter().any(|probe| !matches!(probe, Probe::Done(_))) {
        passes += 1;
        let mut tallies: Vec<Option<Tally>> = probes
            .iter()
            .map(|probe| match probe {
                Probe::Narrow { .. } => Some(Tally::new()),
                _ => None,
            })
            .collect();

        scan(&mut |sample: Sample| {
            let value = sample.value;
            for (probe, tally) in probes.iter_mut().zip(tallies.iter_mut()) {
                match probe {
                    Probe::Narrow { lo, hi, .. } => {
                        if value >= *lo && value <= *hi {
                            if let Some(tally) = tally {
                                tally.observe(*lo, *hi, value);
                            }
                        }
                    }
                    Probe::Collect { lo, hi, values, .. } => {
                        if value >= *lo && value <= *hi {
                            values.push(value);
                        }
                    }
                    Probe::Done(_) => {}
                }
            }
        })?;

        for (probe, tally) in probes.iter_mut().zip(tallies) {
            let next = match probe {
                Probe::Narrow { offset, .. } => match tally {
                    Some(tally) => tally.narrow(*offset, limit)?,
                    None => continue,
                },
                Probe::Collect { offset, values, .. } => {
                    values.sort_by(|a, b| a.total_cmp(b));
                    let value = values
                        .get(*offset as usize)
                        .copied()
                        .ok_or(Error::InsufficientData("population changed between passes"))?;
                    Probe::Done(value)
                }
                Probe::Done(_) => continue,
            };
            *probe = next;
        }
    }
    log::debug!("selected {} ranks in {} passes", ranks.len(), passes);

    Ok(ranks
        .iter()
        .zip(probes)
        .filter_map(|(&rank, probe)| match probe {
            Probe::Done(value) => Some((rank, value)),
            _ => None,
        })
        .collect())
}

/// Statistical summary of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p80: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    #[serde(rename = "p99.9")]
    pub p99_9: f64,
}

pub fn summarize<S>(mut scan: S, method: PercentileMethod, limit: usize) -> Result<Summary>
where
    S: FnMut(&mut dyn FnMut(Sample)) -> Result<()>,
{
    let mut pass = ValuePass::new(limit);
    scan(&mut |sample: Sample| pass.observe(sample.value))?;
    let ValuePass { moments, values, .. } = pass;
    if moments.count == 0 {
        return Err(Error::EmptyMetric);
    }

    let ps: Vec<f64> = SUMMARY_PERCENTILES.iter().map(|&(_, p)| p).collect();
    let stats = OrderStats::resolve(values, &moments, &mut scan, method, &ps, limit)?;
    let n = moments.count as usize;
    let at = |p: f64| method.evaluate(n, p, |rank| stats.at(rank));

    Ok(Summary {
        count: moments.count,
        min: moments.min,
        max: moments.max,
        avg: moments.sum / moments.count as f64,
        p50: at(0.5),
        p80: at(0.8),
        p90: at(0.9),
        p95: at(0.95),
        p99: at(0.99),
        p99_9: at(0.999),
    })
}

/// Sample density over time (x) and value (y).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatMap {
    pub min_timestamp: i64,
    pub max_timestamp: i64,
    pub max_value: f64,
    pub max_density: u64,
    /// Rows indexed by y, columns by x.
    pub map: Vec<Vec<u64>>,
}

impl HeatMap {
    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            min_timestamp: 0,
            max_timestamp: 0,
            max_value: 0.0,
            max_density: 0,
            map: vec![vec![0; width]; height],
        }
    }

    pub fn width(&self) -> usize {
        self.map.first().map_or(0, Vec::len)
    }

    pub fn height(&self) -> usize {
        self.map.len()
    }

    fn is_degenerate(&self) -> bool {
        self.max_timestamp == self.min_timestamp || self.max_value == 0.0
    }

    fn cell(&self, sample: Sample) -> (usize, usize) {
        let (width, height) = (self.width(), self.height());
        let span = (self.max_timestamp as i128 - self.min_timestamp as i128) as f64;
        let offset = (sample.timestamp as i128 - self.min_timestamp as i128) as f64;
        let x = (width as f64 * offset / span).floor();
        let y = (height as f64 * sample.value / self.max_value).floor();
        // Float-to-int casts saturate, so negative positions land on 0.
        ((x as usize).min(width - 1), (y as usize).min(height - 1))
    }

    fn plot(&mut self, sample: Sample) {
        let (x, y) = self.cell(sample);
        let cell = &mut self.map[y][x];
        *cell += 1;
        self.max_density = self.max_density.max(*cell);
    }
}

pub fn build_heat_map<S>(mut scan: S, width: usize, height: usize, limit: usize) -> Result<HeatMap>
where
    S: FnMut(&mut dyn FnMut(Sample)) -> Result<()>,
{
    let mut heat_map = HeatMap::empty(width.max(1), height.max(1));
    heat_map.min_timestamp = i64::MAX;
    heat_map.max_timestamp = i64::MIN;

    let mut count = 0u64;
    let mut buffer: Option<Vec<Sample>> = Some(Vec::new());
    scan(&mut |sample: Sample| {
        count += 1;
        heat_map.min_timestamp = heat_map.min_timestamp.min(sample.timestamp);
        heat_map.max_timestamp = heat_map.max_timestamp.max(sample.timestamp);
        heat_map.max_value = heat_map.max_value.max(sample.value);
        if let Some(samples) = &mut buffer {
            if samples.len() < limit {
                samples.push(sample);
            } else {
                buffer = None;
            }
        }
    })?;

    if count == 0 {
        return Err(Error::EmptyMetric);
    }
    if heat_map.is_degenerate() {
        return Ok(heat_map);
    }

    match buffer {
        Some(samples) => samples.into_iter().for_each(|sample| heat_map.plot(sample)),
        None => scan(&mut |sample: Sample| heat_map.plot(sample))?,
    }
    Ok(heat_map)
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    /// Share of the population in `[lower, upper)`, in percent.
    pub percent: f64,
}

impl HistogramBin {
    pub fn label(&self) -> String {
        format!("{:.6} - {:.6}", self.lower, self.upper)
    }

    fn contains(&self, value: f64) -> bool {
        value >= self.lower && value < self.upper
    }
}

/// Equal-width bins over `[min, p99]`. Serializes as `{label: percent}` in
/// bin order.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub bins: Vec<HistogramBin>,
}

impl Histogram {
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.bins.iter().map(|bin| (bin.label(), bin.percent)).collect()
    }
}

impl Serialize for Histogram {
    fn serialize<Z: Serializer>(&self, serializer: Z) -> std::result::Result<Z::Ok, Z::Error> {
        let mut map = serializer.serialize_map(Some(self.bins.len()))?;
        for bin in &self.bins {
            map.serialize_entry(&bin.label(), &bin.percent)?;
        }
        map.end()
    }
}

pub fn build_histogram<S>(
    mut scan: S,
    bins: usize,
    method: PercentileMethod,
    limit: usize,
) -> Result<Histogram>
where
    S: FnMut(&mut dyn FnMut(Sample)) -> Result<()>,
{
    let mut pass = ValuePass::new(limit);
    scan(&mut |sample: Sample| pass.observe(sample.value))?;
    let ValuePass { moments, values, .. } = pass;
    if moments.count <= 1 {
        return Err(Error::InsufficientData("not enough data points"));
    }

    let stats = OrderStats::resolve(
        values,
        &moments,
        &mut scan,
        method,
        &[HISTOGRAM_PERCENTILE],
        limit,
    )?;
    let n = moments.count as usize;
    let p99 = method.evaluate(n, HISTOGRAM_PERCENTILE, |rank| stats.at(rank));
    let min = moments.min;
    if p99 == min {
        return Err(Error::InsufficientData("dataset lacks variation"));
    }

    let bins = bins.max(1);
    let delta = (p99 - min) / bins as f64;
    // Edges are computed from `min` so neighbouring bins share them exactly;
    // the last bin ends at p99.
    let edge = |i: usize| if i == bins { p99 } else { min + i as f64 * delta };
    let mut ranges: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: edge(i),
            upper: edge(i + 1),
            percent: 0.0,
        })
        .collect();

    let mut counts = vec![0u64; bins];
    let mut tally = |value: f64| {
        for (bin, count) in ranges.iter().zip(counts.iter_mut()) {
            if bin.contains(value) {
                *count += 1;
            }
        }
    };
    match stats {
        OrderStats::Sorted(values) => values.iter().for_each(|&value| tally(value)),
        OrderStats::Selected(_) => scan(&mut |sample: Sample| tally(sample.value))?,
    }

    // Normalized by count - 1 so the top outlier above p99 is excluded.
    let base = (moments.count - 1) as f64;
    for (bin, count) in ranges.iter_mut().zip(counts) {
        bin.percent = 100.0 * count as f64 / base;
    }
    Ok(Histogram { bins: ranges })
}
