use crate::errors::FairgradError;

/// Mean of a slice, 0 when empty.
pub fn mean(v: &[f64]) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    v.iter().sum::<f64>() / v.len() as f64
}

/// Sample standard deviation (ddof = 1), 0 when fewer than two values.
pub fn sample_std(v: &[f64]) -> f64 {
    if v.len() < 2 {
        return 0.0;
    }
    let m = mean(v);
    let ss = v.iter().map(|x| (x - m) * (x - m)).sum::<f64>();
    (ss / (v.len() - 1) as f64).sqrt()
}

/// Dot product of two equal-length slices.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// Validation
pub fn validate_positive_float_parameter(value: f64, parameter: &str) -> Result<(), FairgradError> {
    if value.is_nan() || value <= 0.0 {
        Err(FairgradError::InvalidParameter(
            parameter.to_string(),
            "a real value greater than 0".to_string(),
            value.to_string(),
        ))
    } else {
        Ok(())
    }
}

pub fn validate_positive_int_parameter(value: usize, parameter: &str) -> Result<(), FairgradError> {
    if value == 0 {
        Err(FairgradError::InvalidParameter(
            parameter.to_string(),
            "an integer greater than 0".to_string(),
            value.to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Check that every label is exactly 0 or 1.
pub fn validate_labels(y: &[f64]) -> Result<(), FairgradError> {
    for (i, value) in y.iter().enumerate() {
        if *value != 0.0 && *value != 1.0 {
            return Err(FairgradError::InvalidLabel(i, *value));
        }
    }
    Ok(())
}

/// Check that an input has the expected number of rows.
pub fn validate_rows(name: &str, rows: usize, expected: usize) -> Result<(), FairgradError> {
    if rows != expected {
        Err(FairgradError::DimensionMismatch(name.to_string(), rows, expected))
    } else {
        Ok(())
    }
}
