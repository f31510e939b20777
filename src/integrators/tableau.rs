//! Butcher tableaus for the explicit methods.

#[derive(Debug, Clone, Copy)]
pub struct Tableau {
    /// Strictly lower-triangular stage coefficients, row `i` has `i` entries.
    pub a: &'static [&'static [f64]],
    pub b: &'static [f64],
}

impl Tableau {
    pub fn stages(&self) -> usize {
        self.b.len()
    }
}

pub const EULER: Tableau = Tableau {
    a: &[&[]],
    b: &[1.0],
};

pub const MIDPOINT: Tableau = Tableau {
    a: &[&[], &[0.5]],
    b: &[0.0, 1.0],
};

pub const HEUN: Tableau = Tableau {
    a: &[&[], &[1.0]],
    b: &[0.5, 0.5],
};

pub const RK4: Tableau = Tableau {
    a: &[&[], &[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
    b: &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
};

/// Fifth-order weights of the Cash–Karp pair, taken at a fixed step.
pub const CASH_KARP: Tableau = Tableau {
    a: &[
        &[],
        &[1.0 / 5.0],
        &[3.0 / 40.0, 9.0 / 40.0],
        &[3.0 / 10.0, -9.0 / 10.0, 6.0 / 5.0],
        &[-11.0 / 54.0, 5.0 / 2.0, -70.0 / 27.0, 35.0 / 27.0],
        &[
            1631.0 / 55296.0,
            175.0 / 512.0,
            575.0 / 13824.0,
            44275.0 / 110592.0,
            253.0 / 4096.0,
        ],
    ],
    b: &[
        37.0 / 378.0,
        0.0,
        250.0 / 621.0,
        125.0 / 594.0,
        0.0,
        512.0 / 1771.0,
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tableaus_are_consistent() {
        for tableau in [EULER, MIDPOINT, HEUN, RK4, CASH_KARP] {
            assert_eq!(tableau.a.len(), tableau.stages());
            for (i, row) in tableau.a.iter().enumerate() {
                assert_eq!(row.len(), i);
            }
            let sum: f64 = tableau.b.iter().sum();
            assert!((sum - 1.0).abs() < 1e-12);
        }
    }
}
