//! Device DRAM region assignment.
//!
//! The board has two 4 GiB DDR banks. Ring buffers are carved out of them
//! depending on how many generators and receivers take part in a
//! measurement: replay-only and capture-only setups spread over both
//! banks for maximum ring depth, mixed setups keep TX rings in bank A and
//! RX rings in bank B so replay and capture never compete for a memory
//! controller.

use crate::error::{Result, TesterError};
use fluent10g_chip::dram::{bank_a, bank_b};

const GIB: u64 = 1024 * 1024 * 1024;

/// A ring buffer region in device DRAM: base address and `size - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingRegion {
    /// Base address in the device address space.
    pub addr: u64,
    /// Address range (`size - 1`); rings never exceed 4 GiB.
    pub range: u32,
}

impl RingRegion {
    /// Region size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.range as u64 + 1
    }

    const fn bank_a() -> Self {
        Self { addr: bank_a::ADDR, range: bank_a::RANGE }
    }

    const fn bank_b() -> Self {
        Self { addr: bank_b::ADDR, range: bank_b::RANGE }
    }

    /// Half `half` (0 or 1) of a 4 GiB bank.
    const fn half(bank: Self, half: u64) -> Self {
        let size = (bank.range as u64 + 1) / 2;
        Self {
            addr: bank.addr + half * size,
            range: (size - 1) as u32,
        }
    }

    /// 1 GiB slice `idx` of a bank.
    const fn gib_slice(bank: Self, idx: u64) -> Self {
        Self {
            addr: bank.addr + idx * GIB,
            range: (GIB - 1) as u32,
        }
    }
}

/// Ring regions assigned to the configured generators and receivers,
/// keyed by interface ID.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryPlan {
    /// `(interface id, region)` per configured generator.
    pub generators: Vec<(usize, RingRegion)>,
    /// `(interface id, region)` per configured receiver.
    pub receivers: Vec<(usize, RingRegion)>,
}

/// Assign DRAM regions to the interfaces configured for replay
/// (`gen_ids`) and capture (`recv_ids`), both in ascending interface
/// order.
///
/// # Errors
///
/// Returns an error if the board layout is not the supported 2× 4 GiB
/// configuration or more interfaces are configured than exist.
pub fn assign_regions(gen_ids: &[usize], recv_ids: &[usize]) -> Result<MemoryPlan> {
    // The policy below is tailored to two 4 GiB banks; any other layout
    // needs different carving (and hardware support).
    if bank_a::ADDR != 0x0
        || bank_b::ADDR != 0x1_0000_0000
        || bank_a::RANGE != 0xFFFF_FFFF
        || bank_b::RANGE != 0xFFFF_FFFF
    {
        return Err(TesterError::config(
            "only the 2x 4 GiB DDR board layout is supported",
        ));
    }
    if gen_ids.len() > 4 || recv_ids.len() > 4 {
        return Err(TesterError::config("more than four interfaces configured"));
    }

    let mut plan = MemoryPlan::default();

    let spread = |ids: &[usize], out: &mut Vec<(usize, RingRegion)>| {
        // Replay-only / capture-only: use both banks for maximum depth.
        let regions = match ids.len() {
            1 => vec![RingRegion::bank_a()],
            2 => vec![RingRegion::bank_a(), RingRegion::bank_b()],
            3 => vec![
                RingRegion::half(RingRegion::bank_a(), 0),
                RingRegion::half(RingRegion::bank_a(), 1),
                RingRegion::bank_b(),
            ],
            4 => vec![
                RingRegion::half(RingRegion::bank_a(), 0),
                RingRegion::half(RingRegion::bank_a(), 1),
                RingRegion::half(RingRegion::bank_b(), 0),
                RingRegion::half(RingRegion::bank_b(), 1),
            ],
            _ => unreachable!("0 and >4 handled by the caller"),
        };
        out.extend(ids.iter().copied().zip(regions));
    };

    match (gen_ids.len(), recv_ids.len()) {
        (0, 0) => {}
        (_, 0) => spread(gen_ids, &mut plan.generators),
        (0, _) => spread(recv_ids, &mut plan.receivers),
        (1, 1) => {
            plan.generators.push((gen_ids[0], RingRegion::bank_a()));
            plan.receivers.push((recv_ids[0], RingRegion::bank_b()));
        }
        _ => {
            // Mixed setups: TX rings in bank A, RX rings in bank B, one
            // 1 GiB slice each.
            for (i, &id) in gen_ids.iter().enumerate() {
                plan.generators
                    .push((id, RingRegion::gib_slice(RingRegion::bank_a(), i as u64)));
            }
            for (i, &id) in recv_ids.iter().enumerate() {
                plan.receivers
                    .push((id, RingRegion::gib_slice(RingRegion::bank_b(), i as u64)));
            }
        }
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluent10g_chip::dram::{
        RING_RD_TRANSFER_SIZE_MIN, RING_SIZE_ALIGN, RING_WR_TRANSFER_SIZE_MAX,
    };

    fn in_one_bank(region: &RingRegion) -> bool {
        let end = region.addr + region.size();
        (region.addr >= bank_a::ADDR && end <= bank_a::ADDR + bank_a::SIZE)
            || (region.addr >= bank_b::ADDR && end <= bank_b::ADDR + bank_b::SIZE)
    }

    #[test]
    fn single_generator_gets_all_of_bank_a() {
        let plan = assign_regions(&[0], &[]).unwrap();
        assert_eq!(plan.generators, vec![(0, RingRegion { addr: 0, range: 0xFFFF_FFFF })]);
        assert!(plan.receivers.is_empty());
    }

    #[test]
    fn single_receiver_mirrors_generator_policy() {
        let plan = assign_regions(&[], &[2]).unwrap();
        assert_eq!(plan.receivers, vec![(2, RingRegion { addr: 0, range: 0xFFFF_FFFF })]);
    }

    #[test]
    fn three_generators_split_bank_a() {
        let plan = assign_regions(&[0, 1, 3], &[]).unwrap();
        let regions: Vec<RingRegion> = plan.generators.iter().map(|(_, r)| *r).collect();
        assert_eq!(regions[0], RingRegion { addr: 0, range: 0x7FFF_FFFF });
        assert_eq!(regions[1], RingRegion { addr: 0x8000_0000, range: 0x7FFF_FFFF });
        assert_eq!(regions[2], RingRegion { addr: 0x1_0000_0000, range: 0xFFFF_FFFF });
    }

    #[test]
    fn one_generator_one_receiver_get_a_bank_each() {
        let plan = assign_regions(&[1], &[2]).unwrap();
        assert_eq!(plan.generators, vec![(1, RingRegion { addr: 0, range: 0xFFFF_FFFF })]);
        assert_eq!(
            plan.receivers,
            vec![(2, RingRegion { addr: 0x1_0000_0000, range: 0xFFFF_FFFF })]
        );
    }

    #[test]
    fn mixed_setup_slices_gib_per_interface() {
        let plan = assign_regions(&[0, 1], &[2, 3]).unwrap();
        assert_eq!(
            plan.generators,
            vec![
                (0, RingRegion { addr: 0, range: (GIB - 1) as u32 }),
                (1, RingRegion { addr: GIB, range: (GIB - 1) as u32 }),
            ]
        );
        assert_eq!(
            plan.receivers,
            vec![
                (2, RingRegion { addr: 0x1_0000_0000, range: (GIB - 1) as u32 }),
                (3, RingRegion { addr: 0x1_0000_0000 + GIB, range: (GIB - 1) as u32 }),
            ]
        );
    }

    #[test]
    fn nothing_configured_assigns_nothing() {
        assert_eq!(assign_regions(&[], &[]).unwrap(), MemoryPlan::default());
    }

    #[test]
    fn all_legal_combinations_yield_disjoint_valid_regions() {
        for n_gen in 0..=4usize {
            for n_recv in 0..=4usize {
                let gen_ids: Vec<usize> = (0..n_gen).collect();
                let recv_ids: Vec<usize> = (0..n_recv).collect();
                let plan = assign_regions(&gen_ids, &recv_ids).unwrap();

                let mut regions: Vec<RingRegion> = Vec::new();
                regions.extend(plan.generators.iter().map(|(_, r)| *r));
                regions.extend(plan.receivers.iter().map(|(_, r)| *r));
                assert_eq!(regions.len(), n_gen + n_recv);

                for region in &regions {
                    assert_eq!(region.size() % RING_SIZE_ALIGN, 0);
                    assert!(region.size() > u64::from(RING_WR_TRANSFER_SIZE_MAX));
                    assert!(region.size() > u64::from(RING_RD_TRANSFER_SIZE_MIN));
                    assert!(in_one_bank(region), "{region:?} spans banks");
                }

                for (i, a) in regions.iter().enumerate() {
                    for b in &regions[i + 1..] {
                        let disjoint =
                            a.addr + a.size() <= b.addr || b.addr + b.size() <= a.addr;
                        assert!(disjoint, "{a:?} overlaps {b:?}");
                    }
                }
            }
        }
    }
}
