use arm_jit_backend::x86_64::backend::build_condition_table;
use arm_jit_core::Condition;

/// Independent reference predicate over the flag nibble.
fn reference(condition: Condition, flags: u32) -> bool {
    let n = flags & 8 != 0;
    let z = flags & 4 != 0;
    let c = flags & 2 != 0;
    let v = flags & 1 != 0;
    match condition {
        Condition::EQ => z,
        Condition::NE => !z,
        Condition::CS => c,
        Condition::CC => !c,
        Condition::MI => n,
        Condition::PL => !n,
        Condition::VS => v,
        Condition::VC => !v,
        Condition::HI => c && !z,
        Condition::LS => !c || z,
        Condition::GE => n == v,
        Condition::LT => n != v,
        Condition::GT => !z && (n == v),
        Condition::LE => z || (n != v),
        Condition::AL => true,
        Condition::NV => false,
    }
}

#[test]
fn table_matches_reference_truth_table() {
    let table = build_condition_table();
    for condition_bits in 0..16u32 {
        let condition = Condition::from_bits(condition_bits);
        for flags in 0..16u32 {
            assert_eq!(
                table[condition_bits as usize][flags as usize] != 0,
                reference(condition, flags),
                "mismatch for {:?} with flags {:04b}",
                condition,
                flags
            );
        }
    }
}

#[test]
fn never_condition_is_always_false() {
    let table = build_condition_table();
    assert!(table[Condition::NV as usize].iter().all(|&entry| entry == 0));
    assert!(table[Condition::AL as usize].iter().all(|&entry| entry == 1));
}
