/// Mean of the present values.
pub fn avg<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (total, count) = present(values).fold((0.0, 0usize), |(total, count), value| {
        (total + value, count + 1)
    });
    (count > 0).then(|| total / count as f64)
}

/// Sum of the present values.
pub fn sum<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    present(values).reduce(|acc, value| acc + value)
}

/// Largest present value. The first present value seeds the comparison, so
/// all-negative input still yields its true maximum.
pub fn max<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    present(values).reduce(f64::max)
}

/// Smallest present value.
pub fn min<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    present(values).reduce(f64::min)
}

fn present<I>(values: I) -> impl Iterator<Item = f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    values
        .into_iter()
        .flatten()
        .filter(|value| value.is_finite())
}

/// Running collector used when folding many laps or records into one
/// aggregate.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    count: usize,
    total: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&mut self, value: Option<f64>) {
        let Some(value) = value.filter(|value| value.is_finite()) else {
            return;
        };
        self.count += 1;
        self.total += value;
        self.min = Some(self.min.map_or(value, |current| current.min(value)));
        self.max = Some(self.max.map_or(value, |current| current.max(value)));
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn sum(&self) -> Option<f64> {
        (self.count > 0).then_some(self.total)
    }

    pub fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total / self.count as f64)
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }
}

impl FromIterator<Option<f64>> for Accumulator {
    fn from_iter<T: IntoIterator<Item = Option<f64>>>(iter: T) -> Self {
        let mut accumulator = Accumulator::new();
        for value in iter {
            accumulator.collect(value);
        }
        accumulator
    }
}
