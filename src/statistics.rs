use interp::{interp, InterpMode};

/// One-dimensional linear interpolation with clamping at both ends, equivalent to numpy's
/// `interp` for monotonically increasing `xp`.
pub(crate) fn np_interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    assert_eq!(xp.len(), fp.len(), "xp and fp must be the same length");
    assert!(!xp.is_empty(), "cannot interpolate on an empty table");

    let last = xp.len() - 1;
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[last] {
        return fp[last];
    }

    interp(xp, fp, x, &InterpMode::FirstLast)
}
