/// 把连续空白压缩成一个空格，引号内的内容保持原样。
pub fn collapse_whitespace(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_space = false;
    let mut quote: Option<char> = None;
    for ch in input.chars() {
        match quote {
            Some(open) => {
                result.push(ch);
                if ch == open {
                    quote = None;
                }
            }
            None if ch.is_whitespace() => {
                if !last_was_space {
                    result.push(' ');
                    last_was_space = true;
                }
                continue;
            }
            None => {
                if ch == '"' || ch == '\'' {
                    quote = Some(ch);
                }
                result.push(ch);
            }
        }
        last_was_space = false;
    }
    result.trim().to_string()
}

/// 两个空格一级的缩进。
pub fn indent(level: usize) -> String {
    "  ".repeat(level)
}

/// 按精度舍入，先加上极小量以抵消二进制误差。
pub fn fround(value: f64, precision: Option<u32>) -> f64 {
    match precision {
        Some(digits) => format!("{:.*}", digits as usize, value + 2e-16)
            .parse()
            .unwrap_or(value),
        None => value,
    }
}

/// 数值的十进制表示；接近零的值展开成定点形式而不是科学计数法。
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if value.abs() < 1e-6 {
        let fixed = format!("{value:.20}");
        let trimmed = fixed.trim_end_matches('0');
        return trimmed.trim_end_matches('.').to_string();
    }
    format!("{value}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn collapse_keeps_quoted_text() {
        assert_eq!(
            collapse_whitespace("  a \n\t b  \"x   y\" "),
            "a b \"x   y\""
        );
    }

    #[test]
    fn rounding_and_formatting() {
        assert_eq!(fround(1.0 / 3.0, Some(8)), 0.33333333);
        assert_eq!(fround(0.1 + 0.2, Some(8)), 0.3);
        assert_eq!(format_number(0.0000001), "0.0000001");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(12.5), "12.5");
        assert_eq!(indent(2), "    ");
    }
}
