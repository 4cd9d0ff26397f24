//! Start order of containers

use super::graph::Container;

/// Sort containers by group order, then container order, then full name.
///
/// The full name is unique, so the result does not depend on input order.
pub fn order<'a, I>(containers: I) -> Vec<&'a Container>
where
    I: IntoIterator<Item = &'a Container>,
{
    let mut ordered: Vec<&Container> = containers.into_iter().collect();
    ordered.sort_by_cached_key(|c| (c.group_order(), c.order(), c.name()));
    ordered
}
