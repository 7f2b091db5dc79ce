//! 带复合单位的数值与单位代数。

use crate::error::{LessError, LessResult};
use crate::utils::{format_number, fround};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt::{self, Display};

/// 值内可出现的四则运算符。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operator {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "+" => Some(Operator::Add),
            "-" => Some(Operator::Subtract),
            "*" => Some(Operator::Multiply),
            "/" | "./" => Some(Operator::Divide),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
        }
    }

    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Operator::Add => a + b,
            Operator::Subtract => a - b,
            Operator::Multiply => a * b,
            Operator::Divide => a / b,
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 可互相换算的单位族，系数以族内基准单位表示。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnitFamily {
    Length,
    Duration,
    Angle,
}

impl UnitFamily {
    pub const ALL: [UnitFamily; 3] = [UnitFamily::Length, UnitFamily::Duration, UnitFamily::Angle];

    fn factor(self, unit: &str) -> Option<f64> {
        let factor = match (self, unit) {
            (UnitFamily::Length, "m") => 1.0,
            (UnitFamily::Length, "cm") => 0.01,
            (UnitFamily::Length, "mm") => 0.001,
            (UnitFamily::Length, "in") => 0.0254,
            (UnitFamily::Length, "px") => 0.0254 / 96.0,
            (UnitFamily::Length, "pt") => 0.0254 / 72.0,
            (UnitFamily::Length, "pc") => 0.0254 / 72.0 * 12.0,
            (UnitFamily::Duration, "s") => 1.0,
            (UnitFamily::Duration, "ms") => 0.001,
            (UnitFamily::Angle, "rad") => 1.0 / (2.0 * PI),
            (UnitFamily::Angle, "deg") => 1.0 / 360.0,
            (UnitFamily::Angle, "grad") => 1.0 / 400.0,
            (UnitFamily::Angle, "turn") => 1.0,
            _ => return None,
        };
        Some(factor)
    }

    pub fn of(unit: &str) -> Option<UnitFamily> {
        Self::ALL
            .into_iter()
            .find(|family| family.factor(unit).is_some())
    }

    /// `unify` 使用的规范单位。
    fn canonical(self) -> &'static str {
        match self {
            UnitFamily::Length => "px",
            UnitFamily::Duration => "s",
            UnitFamily::Angle => "rad",
        }
    }
}

/// 复合单位：分子与分母都是排好序的原子单位列表。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Unit {
    pub numerator: Vec<String>,
    pub denominator: Vec<String>,
    /// 无单位数值继承他人单位时记住的单位，用于输出退化的复合单位。
    pub backup_unit: Option<String>,
}

impl Unit {
    pub fn new(
        mut numerator: Vec<String>,
        mut denominator: Vec<String>,
        backup_unit: Option<String>,
    ) -> Self {
        numerator.sort();
        denominator.sort();
        let backup_unit = backup_unit.or_else(|| numerator.first().cloned());
        Self {
            numerator,
            denominator,
            backup_unit,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(unit: &str) -> Self {
        if unit.is_empty() {
            return Self::empty();
        }
        Self::new(vec![unit.to_string()], Vec::new(), None)
    }

    /// 复制一份单位；没有备份单位时取第一个分子补上。
    pub fn derive(&self) -> Self {
        Self::new(
            self.numerator.clone(),
            self.denominator.clone(),
            self.backup_unit.clone(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.numerator.is_empty() && self.denominator.is_empty()
    }

    pub fn is_singular(&self) -> bool {
        self.numerator.len() <= 1 && self.denominator.is_empty()
    }

    /// 约去分子分母中成对出现的原子单位，结果保持有序。
    pub fn cancel(&mut self) {
        let mut counter: BTreeMap<String, i64> = BTreeMap::new();
        for atomic in self.numerator.drain(..) {
            *counter.entry(atomic).or_insert(0) += 1;
        }
        for atomic in self.denominator.drain(..) {
            *counter.entry(atomic).or_insert(0) -= 1;
        }
        for (atomic, count) in counter {
            match count.cmp(&0) {
                Ordering::Greater => {
                    for _ in 0..count {
                        self.numerator.push(atomic.clone());
                    }
                }
                Ordering::Less => {
                    for _ in 0..-count {
                        self.denominator.push(atomic.clone());
                    }
                }
                Ordering::Equal => {}
            }
        }
    }

    /// 每个单位族中首次出现的原子单位。
    pub fn used_units(&self) -> BTreeMap<UnitFamily, String> {
        let mut used = BTreeMap::new();
        for atomic in self.numerator.iter().chain(self.denominator.iter()) {
            if let Some(family) = UnitFamily::of(atomic) {
                used.entry(family).or_insert_with(|| atomic.clone());
            }
        }
        used
    }

    /// 输出时使用的单位：单一分子优先，其次（非严格模式下）是备份单位或第一个分母。
    pub fn css_unit(&self, strict_units: bool) -> &str {
        if self.numerator.len() == 1 {
            return &self.numerator[0];
        }
        if !strict_units {
            if let Some(backup) = &self.backup_unit {
                return backup;
            }
            if let Some(first) = self.denominator.first() {
                return first;
            }
        }
        ""
    }

    fn map(&mut self, mut apply: impl FnMut(&str, bool) -> String) {
        for atomic in self.numerator.iter_mut() {
            *atomic = apply(atomic, false);
        }
        for atomic in self.denominator.iter_mut() {
            *atomic = apply(atomic, true);
        }
    }
}

impl Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.numerator.join("*"))?;
        for atomic in &self.denominator {
            write!(f, "/{atomic}")?;
        }
        Ok(())
    }
}

/// 数值与单位组成的二元组。
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub value: f64,
    pub unit: Unit,
}

impl Dimension {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    pub fn unitless(value: f64) -> Self {
        Self::new(value, Unit::empty())
    }

    pub fn with_unit(value: f64, unit: &str) -> Self {
        Self::new(value, Unit::single(unit))
    }

    /// 把 `10px`、`.5em`、`50%` 这样的词素拆成数值与单位。
    pub fn parse(lexeme: &str) -> LessResult<Self> {
        let split = lexeme
            .char_indices()
            .find(|(idx, ch)| {
                !(ch.is_ascii_digit() || *ch == '.' || (*idx == 0 && matches!(ch, '-' | '+')))
            })
            .map_or(lexeme.len(), |(idx, _)| idx);
        let (number, unit) = lexeme.split_at(split);
        let value: f64 = number
            .parse()
            .map_err(|_| LessError::eval(format!("无法解析数值: {lexeme}")))?;
        Ok(Self::with_unit(value, unit))
    }

    /// 二元运算，默认沿用左操作数的单位，因此 `1px + 2` 得到 `3px`。
    pub fn operate(&self, op: Operator, other: &Dimension, strict_units: bool) -> LessResult<Self> {
        let mut value = op.apply(self.value, other.value);
        let mut unit = self.unit.derive();
        match op {
            Operator::Add | Operator::Subtract => {
                if unit.is_empty() {
                    unit = other.unit.derive();
                    if self.unit.backup_unit.is_some() {
                        unit.backup_unit = self.unit.backup_unit.clone();
                    }
                } else if !(other.unit.numerator.is_empty() && unit.denominator.is_empty()) {
                    // 严格模式不做隐式换算
                    if strict_units && other.unit.to_string() != unit.to_string() {
                        return Err(LessError::incompatible_units(
                            unit.to_string(),
                            other.unit.to_string(),
                        ));
                    }
                    let converted = other.convert_to(&self.unit.used_units());
                    value = op.apply(self.value, converted.value);
                }
            }
            Operator::Multiply => {
                unit.numerator.extend(other.unit.numerator.iter().cloned());
                unit.denominator.extend(other.unit.denominator.iter().cloned());
                unit.cancel();
            }
            Operator::Divide => {
                unit.numerator.extend(other.unit.denominator.iter().cloned());
                unit.denominator.extend(other.unit.numerator.iter().cloned());
                unit.cancel();
            }
        }
        Ok(Self::new(value, unit))
    }

    /// 按单位族换算到给定目标单位，未涉及的原子单位保持不变。
    pub fn convert_to(&self, conversions: &BTreeMap<UnitFamily, String>) -> Self {
        let mut value = self.value;
        let mut unit = self.unit.derive();
        for (family, target) in conversions {
            let Some(target_factor) = family.factor(target) else {
                continue;
            };
            unit.map(|atomic, in_denominator| match family.factor(atomic) {
                Some(factor) => {
                    if in_denominator {
                        value /= factor / target_factor;
                    } else {
                        value *= factor / target_factor;
                    }
                    target.clone()
                }
                None => atomic.to_string(),
            });
        }
        unit.cancel();
        Self::new(value, unit)
    }

    /// 换算到单个目标单位，目标不属于任何单位族时原样返回。
    pub fn convert_to_unit(&self, target: &str) -> Self {
        match UnitFamily::of(target) {
            Some(family) => {
                let mut conversions = BTreeMap::new();
                conversions.insert(family, target.to_string());
                self.convert_to(&conversions)
            }
            None => self.clone(),
        }
    }

    /// 转换成各单位族的规范单位（px / s / rad）。
    pub fn unify(&self) -> Self {
        let conversions = UnitFamily::ALL
            .into_iter()
            .map(|family| (family, family.canonical().to_string()))
            .collect();
        self.convert_to(&conversions)
    }

    /// 比较两个数值；单位规范化后仍不一致时返回 `None`，表示无法比较。
    pub fn compare(&self, other: &Dimension) -> Option<Ordering> {
        if self.unit.is_empty() || other.unit.is_empty() {
            return self.value.partial_cmp(&other.value);
        }
        let a = self.unify();
        let b = other.unify();
        if a.unit.to_string() != b.unit.to_string() {
            return None;
        }
        a.value.partial_cmp(&b.value)
    }

    /// 生成 CSS 文本。
    pub fn to_css(
        &self,
        precision: Option<u32>,
        strict_units: bool,
        compress: bool,
    ) -> LessResult<String> {
        if strict_units && !self.unit.is_singular() {
            return Err(LessError::MultipleUnits {
                unit: self.unit.to_string(),
            });
        }
        if !self.value.is_finite() {
            return Err(LessError::eval(format!(
                "数值 {} 无法输出为 CSS",
                self.value
            )));
        }
        let value = fround(self.value, precision);
        let mut text = format_number(value);
        if compress && value != 0.0 && value.abs() < 1.0 {
            if let Some(fraction) = text.strip_prefix("0.") {
                text = format!(".{fraction}");
            } else if let Some(fraction) = text.strip_prefix("-0.") {
                text = format!("-.{fraction}");
            }
        }
        text.push_str(self.unit.css_unit(strict_units));
        Ok(text)
    }
}
