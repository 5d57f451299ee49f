use rand::rng;
use rand::seq::SliceRandom;

/// Deal a fresh presentation order for a module's questions.
#[must_use]
pub(crate) fn deal_order(question_count: u32) -> Vec<u32> {
    let mut order: Vec<u32> = (0..question_count).collect();
    let mut rng = rng();
    order.as_mut_slice().shuffle(&mut rng);
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dealt_order_is_a_permutation() {
        let order = deal_order(16);
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..16).collect::<Vec<u32>>());
    }

    #[test]
    fn empty_module_deals_an_empty_order() {
        assert!(deal_order(0).is_empty());
    }
}
