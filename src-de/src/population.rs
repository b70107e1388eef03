//! Fixed-size population held as parallel arrays.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, concatenate};

/// Points in [0,1]^D with their ids, fitness values and ages.
///
/// The four sequences always have the same length; every mutator below
/// preserves that.
#[derive(Debug, Clone)]
pub struct Population {
    pub vectors: Array2<f64>,
    pub ids: Vec<usize>,
    pub fitness: Array1<f64>,
    pub age: Array1<f64>,
}

impl Population {
    /// Fresh population: fitness starts at +inf, age at `max_age`.
    pub fn new(vectors: Array2<f64>, ids: Vec<usize>, max_age: f64) -> Self {
        let n = vectors.nrows();
        assert_eq!(ids.len(), n, "ids/vectors length mismatch");
        Self {
            vectors,
            ids,
            fitness: Array1::from_elem(n, f64::INFINITY),
            age: Array1::from_elem(n, max_age),
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimensionality of the search vectors.
    pub fn dim(&self) -> usize {
        self.vectors.ncols()
    }

    pub fn member(&self, i: usize) -> ArrayView1<'_, f64> {
        self.vectors.row(i)
    }

    /// One-to-one replacement of member `i`, resetting its age.
    pub fn replace(&mut self, i: usize, vector: ArrayView1<f64>, id: usize, fitness: f64, max_age: f64) {
        self.vectors.row_mut(i).assign(&vector);
        self.ids[i] = id;
        self.fitness[i] = fitness;
        self.age[i] = max_age;
    }

    /// Index of the best (minimum-fitness) member; first index on ties.
    pub fn argmin_fitness(&self) -> usize {
        let mut best = 0;
        for i in 1..self.fitness.len() {
            if self.fitness[i] < self.fitness[best] {
                best = i;
            }
        }
        best
    }

    /// Index of the worst (maximum-fitness) member; first index on ties.
    pub fn argmax_fitness(&self) -> usize {
        let mut worst = 0;
        for i in 1..self.fitness.len() {
            if self.fitness[i] > self.fitness[worst] {
                worst = i;
            }
        }
        worst
    }

    /// Appends fresh members with +inf fitness and `max_age` age.
    pub fn extend(&mut self, vectors: ArrayView2<f64>, ids: &[usize], max_age: f64) {
        let added = vectors.nrows();
        assert_eq!(ids.len(), added, "ids/vectors length mismatch");
        self.vectors = concatenate![Axis(0), self.vectors.view(), vectors];
        self.ids.extend_from_slice(ids);
        self.fitness = concatenate![Axis(0), self.fitness.view(), Array1::from_elem(added, f64::INFINITY).view()];
        self.age = concatenate![Axis(0), self.age.view(), Array1::from_elem(added, max_age).view()];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn pop() -> Population {
        Population::new(arr2(&[[0.1, 0.2], [0.3, 0.4], [0.5, 0.6]]), vec![0, 1, 2], f64::INFINITY)
    }

    #[test]
    fn fresh_population_starts_unevaluated() {
        let p = pop();
        assert_eq!(p.len(), 3);
        assert_eq!(p.dim(), 2);
        assert!(p.fitness.iter().all(|f| f.is_infinite()));
        assert!(p.age.iter().all(|a| a.is_infinite()));
    }

    #[test]
    fn replace_updates_all_parallel_arrays() {
        let mut p = pop();
        p.replace(1, ndarray::arr1(&[0.9, 0.9]).view(), 7, 0.5, 10.0);
        assert_eq!(p.ids[1], 7);
        assert_eq!(p.fitness[1], 0.5);
        assert_eq!(p.age[1], 10.0);
        assert_eq!(p.member(1).to_vec(), vec![0.9, 0.9]);
    }

    #[test]
    fn argmin_and_argmax_break_ties_by_first_index() {
        let mut p = pop();
        p.fitness = ndarray::arr1(&[1.0, 0.5, 0.5]);
        assert_eq!(p.argmin_fitness(), 1);
        p.fitness = ndarray::arr1(&[2.0, 2.0, 1.0]);
        assert_eq!(p.argmax_fitness(), 0);
    }

    #[test]
    fn extend_keeps_arrays_aligned() {
        let mut p = pop();
        p.extend(arr2(&[[0.7, 0.8]]).view(), &[3], 5.0);
        assert_eq!(p.len(), 4);
        assert_eq!(p.ids.len(), 4);
        assert_eq!(p.fitness.len(), 4);
        assert_eq!(p.age.len(), 4);
        assert!(p.fitness[3].is_infinite());
        assert_eq!(p.age[3], 5.0);
    }
}
