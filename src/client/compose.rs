//! Effective option composition

use crate::connection::DialOption;

/// Build the effective option list for a plugin connection
///
/// Returns a new list holding `options` followed by [`DialOption::Block`] and
/// [`DialOption::Insecure`]. Appended last, those two win over any earlier
/// entry for the same concern. The caller's slice is only read.
///
/// ```
/// use plugin_channel::{compose, DialOption};
///
/// let effective = compose(&[DialOption::Lazy]);
/// assert_eq!(effective, vec![DialOption::Lazy, DialOption::Block, DialOption::Insecure]);
/// ```
pub fn compose(options: &[DialOption]) -> Vec<DialOption> {
    let mut effective = Vec::with_capacity(options.len() + 2);
    effective.extend_from_slice(options);
    effective.push(DialOption::Block);
    effective.push(DialOption::Insecure);
    effective
}
