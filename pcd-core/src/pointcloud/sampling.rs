use rand::{seq::SliceRandom as _, Rng};

use crate::error::{Error, Result};

fn check_fraction(name: &str, fraction: f64) -> Result<()> {
    if fraction > 0.0 && fraction < 1.0 {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{name} must be strictly between 0 and 1, got {fraction}"
        )))
    }
}

/// Shuffles `0..n_rows` and splits it into (train, test) row indices.
/// The test part holds `ceil(test_fraction * n_rows)` rows; both parts must be
/// non-empty.
pub fn train_test_split<R: Rng + ?Sized>(
    n_rows: usize,
    test_fraction: f64,
    rng: &mut R,
) -> Result<(Vec<usize>, Vec<usize>)> {
    check_fraction("test fraction", test_fraction)?;

    let n_test = (test_fraction * n_rows as f64).ceil() as usize;
    let n_train = n_rows.saturating_sub(n_test);
    if n_test == 0 || n_train == 0 {
        return Err(Error::Shape(format!(
            "splitting {n_rows} rows with test fraction {test_fraction} leaves an empty partition"
        )));
    }

    let mut indices: Vec<usize> = (0..n_rows).collect();
    indices.shuffle(rng);
    let test = indices.split_off(n_train);
    Ok((indices, test))
}

/// Random subset holding about `fraction` of `0..n_rows`, drawn without
/// replacement (the train side of a split with test fraction `1 - fraction`).
pub fn sample_rows<R: Rng + ?Sized>(
    n_rows: usize,
    fraction: f64,
    rng: &mut R,
) -> Result<Vec<usize>> {
    check_fraction("sample fraction", fraction)?;
    let (sample, _) = train_test_split(n_rows, 1.0 - fraction, rng)?;
    Ok(sample)
}
