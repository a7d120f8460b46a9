/// 时间基换算的舍入方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// 向零取整
    Zero,
    /// 远离零取整
    AwayFromZero,
    /// 向负无穷取整
    Down,
    /// 向正无穷取整
    Up,
    /// 四舍五入，.5 偏向正无穷
    NearInf,
}

/// 计算 a*b/c，按给定方式舍入
///
/// 对全部 int64 定义域安全，b、c 不超过 i32::MAX 时不会溢出。
pub fn rescale_rnd(a: i64, b: i64, c: i64, rnd: Rounding) -> i64 {
    if c <= 0 || b < 0 {
        return i64::MIN;
    }
    let prod = a as i128 * b as i128;
    let c = c as i128;
    let q = match rnd {
        Rounding::Zero => {
            // i128 division truncates toward zero
            prod / c
        }
        Rounding::Down => prod.div_euclid(c),
        Rounding::Up => {
            // ceil
            -((-prod).div_euclid(c))
        }
        Rounding::AwayFromZero => {
            if prod >= 0 {
                (prod + c - 1).div_euclid(c)
            } else {
                -((-prod + c - 1).div_euclid(c))
            }
        }
        Rounding::NearInf => (prod + c / 2).div_euclid(c),
    };
    if q > i64::MAX as i128 || q < i64::MIN as i128 {
        return i64::MIN;
    }
    q as i64
}

/// 计算 a*b/c，四舍五入（.5 偏向正无穷）
pub fn rescale(a: i64, b: i64, c: i64) -> i64 {
    rescale_rnd(a, b, c, Rounding::NearInf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_known_values() {
        assert_eq!(rescale(41343243242234, 213123133, 55555), 158603213539123175);
        assert_eq!(rescale(3242, 1221, 44), 89966);
    }

    #[test]
    fn test_rescale_identity() {
        assert_eq!(rescale(90000, 1, 1), 90000);
        assert_eq!(rescale(0, 90000, 1000), 0);
    }

    #[test]
    fn test_rescale_round_near_ties_up() {
        // 3/2 = 1.5 -> 2, -3/2 = -1.5 -> -1 (ties toward +inf)
        assert_eq!(rescale(3, 1, 2), 2);
        assert_eq!(rescale(-3, 1, 2), -1);
        assert_eq!(rescale(5, 1, 2), 3);
        assert_eq!(rescale(-5, 1, 2), -2);
    }

    #[test]
    fn test_rescale_no_overflow_on_large_inputs() {
        // NTP 差值 × 时钟频率规模的乘积不能溢出
        let r = rescale(i64::MAX / 2, 90000, i32::MAX as i64);
        assert!(r > 0);
        assert_eq!(rescale_rnd(10, 3, 4, Rounding::Zero), 7);
        assert_eq!(rescale_rnd(10, 3, 4, Rounding::Up), 8);
        assert_eq!(rescale_rnd(-10, 3, 4, Rounding::Down), -8);
        assert_eq!(rescale_rnd(-10, 3, 4, Rounding::Zero), -7);
    }

    #[test]
    fn test_rescale_invalid_divisor() {
        assert_eq!(rescale(1, 1, 0), i64::MIN);
        assert_eq!(rescale(1, -1, 1), i64::MIN);
    }
}
