// ==========================================
// 屋面估价引擎 - 屋面测量变量模型
// ==========================================
// 职责: 定义公式可读取的封闭变量表 (整体 + 分坡面)
// 红线: 未知变量在构造期拒绝,不允许静默归零
// 红线: 所有长度/面积/数量必须非负且有限
// ==========================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// 变量模型错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VariableError {
    #[error("未知变量: {0}")]
    UnknownVariable(String),

    #[error("变量取值为负: {name}={value}")]
    NegativeValue { name: String, value: f64 },

    #[error("变量取值非有限数: {name}")]
    NonFinite { name: String },

    #[error("未知坡面: {0}")]
    UnknownSlope(String),
}

fn check_value(name: &str, value: f64) -> Result<f64, VariableError> {
    if !value.is_finite() {
        return Err(VariableError::NonFinite {
            name: name.to_string(),
        });
    }
    if value < 0.0 {
        return Err(VariableError::NegativeValue {
            name: name.to_string(),
            value,
        });
    }
    Ok(value)
}

// ==========================================
// RoofVariable - 整体屋面变量表
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoofVariable {
    Sq,         // 总面积 (方, 1方 = 100平方英尺)
    Sf,         // 总面积 (平方英尺)
    P,          // 周长
    Eave,       // 檐口长度
    R,          // 屋脊长度
    Val,        // 天沟长度
    Hip,        // 斜脊长度
    Rake,       // 山墙檐长度
    Skylights,  // 天窗数
    Chimneys,   // 烟囱数
    PipeBoots,  // 管道套数
    Vents,      // 通风口数
    GutterLf,   // 檐槽长度
    Downspouts, // 落水管数
}

impl RoofVariable {
    pub const ALL: [RoofVariable; 14] = [
        RoofVariable::Sq,
        RoofVariable::Sf,
        RoofVariable::P,
        RoofVariable::Eave,
        RoofVariable::R,
        RoofVariable::Val,
        RoofVariable::Hip,
        RoofVariable::Rake,
        RoofVariable::Skylights,
        RoofVariable::Chimneys,
        RoofVariable::PipeBoots,
        RoofVariable::Vents,
        RoofVariable::GutterLf,
        RoofVariable::Downspouts,
    ];

    /// 公式中使用的标识符 (大小写敏感)
    pub fn as_str(&self) -> &'static str {
        match self {
            RoofVariable::Sq => "SQ",
            RoofVariable::Sf => "SF",
            RoofVariable::P => "P",
            RoofVariable::Eave => "EAVE",
            RoofVariable::R => "R",
            RoofVariable::Val => "VAL",
            RoofVariable::Hip => "HIP",
            RoofVariable::Rake => "RAKE",
            RoofVariable::Skylights => "SKYLIGHTS",
            RoofVariable::Chimneys => "CHIMNEYS",
            RoofVariable::PipeBoots => "PIPE_BOOTS",
            RoofVariable::Vents => "VENTS",
            RoofVariable::GutterLf => "GUTTER_LF",
            RoofVariable::Downspouts => "DOWNSPOUTS",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        RoofVariable::ALL.iter().copied().find(|v| v.as_str() == name)
    }
}

impl fmt::Display for RoofVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// SlopeVariable - 分坡面变量表
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SlopeVariable {
    Sq,
    Sf,
    Pitch, // 坡度 (x/12)
    Eave,
    Ridge,
    Valley,
    Hip,
    Rake,
}

impl SlopeVariable {
    pub const ALL: [SlopeVariable; 8] = [
        SlopeVariable::Sq,
        SlopeVariable::Sf,
        SlopeVariable::Pitch,
        SlopeVariable::Eave,
        SlopeVariable::Ridge,
        SlopeVariable::Valley,
        SlopeVariable::Hip,
        SlopeVariable::Rake,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlopeVariable::Sq => "SQ",
            SlopeVariable::Sf => "SF",
            SlopeVariable::Pitch => "PITCH",
            SlopeVariable::Eave => "EAVE",
            SlopeVariable::Ridge => "RIDGE",
            SlopeVariable::Valley => "VALLEY",
            SlopeVariable::Hip => "HIP",
            SlopeVariable::Rake => "RAKE",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        SlopeVariable::ALL.iter().copied().find(|v| v.as_str() == name)
    }
}

// ==========================================
// SlopeVariables - 单个坡面测量值
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlopeVariables {
    #[serde(rename = "SQ")]
    pub sq: f64,
    #[serde(rename = "SF")]
    pub sf: f64,
    #[serde(rename = "PITCH")]
    pub pitch: f64,
    #[serde(rename = "EAVE")]
    pub eave: f64,
    #[serde(rename = "RIDGE")]
    pub ridge: f64,
    #[serde(rename = "VALLEY")]
    pub valley: f64,
    #[serde(rename = "HIP")]
    pub hip: f64,
    #[serde(rename = "RAKE")]
    pub rake: f64,
}

impl SlopeVariables {
    pub fn get(&self, var: SlopeVariable) -> f64 {
        match var {
            SlopeVariable::Sq => self.sq,
            SlopeVariable::Sf => self.sf,
            SlopeVariable::Pitch => self.pitch,
            SlopeVariable::Eave => self.eave,
            SlopeVariable::Ridge => self.ridge,
            SlopeVariable::Valley => self.valley,
            SlopeVariable::Hip => self.hip,
            SlopeVariable::Rake => self.rake,
        }
    }

    fn slot(&mut self, var: SlopeVariable) -> &mut f64 {
        match var {
            SlopeVariable::Sq => &mut self.sq,
            SlopeVariable::Sf => &mut self.sf,
            SlopeVariable::Pitch => &mut self.pitch,
            SlopeVariable::Eave => &mut self.eave,
            SlopeVariable::Ridge => &mut self.ridge,
            SlopeVariable::Valley => &mut self.valley,
            SlopeVariable::Hip => &mut self.hip,
            SlopeVariable::Rake => &mut self.rake,
        }
    }

    /// 从键值对构造 (未知键 / 负值 直接拒绝)
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, VariableError>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut vars = SlopeVariables::default();
        for (key, value) in pairs {
            let var = SlopeVariable::parse(key)
                .ok_or_else(|| VariableError::UnknownVariable(key.to_string()))?;
            *vars.slot(var) = check_value(key, value)?;
        }
        Ok(vars)
    }

    pub fn validate(&self) -> Result<(), VariableError> {
        for var in SlopeVariable::ALL {
            check_value(var.as_str(), self.get(var))?;
        }
        Ok(())
    }
}

// ==========================================
// RoofVariables - 屋面整体测量值
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoofVariables {
    #[serde(rename = "SQ")]
    pub sq: f64,
    #[serde(rename = "SF")]
    pub sf: f64,
    #[serde(rename = "P")]
    pub perimeter: f64,
    #[serde(rename = "EAVE")]
    pub eave: f64,
    #[serde(rename = "R")]
    pub ridge: f64,
    #[serde(rename = "VAL")]
    pub valley: f64,
    #[serde(rename = "HIP")]
    pub hip: f64,
    #[serde(rename = "RAKE")]
    pub rake: f64,
    #[serde(rename = "SKYLIGHTS")]
    pub skylights: f64,
    #[serde(rename = "CHIMNEYS")]
    pub chimneys: f64,
    #[serde(rename = "PIPE_BOOTS")]
    pub pipe_boots: f64,
    #[serde(rename = "VENTS")]
    pub vents: f64,
    #[serde(rename = "GUTTER_LF")]
    pub gutter_lf: f64,
    #[serde(rename = "DOWNSPOUTS")]
    pub downspouts: f64,

    /// 坡面名 → 坡面测量值 (可选)
    pub slopes: BTreeMap<String, SlopeVariables>,
}

impl RoofVariables {
    pub fn get(&self, var: RoofVariable) -> f64 {
        match var {
            RoofVariable::Sq => self.sq,
            RoofVariable::Sf => self.sf,
            RoofVariable::P => self.perimeter,
            RoofVariable::Eave => self.eave,
            RoofVariable::R => self.ridge,
            RoofVariable::Val => self.valley,
            RoofVariable::Hip => self.hip,
            RoofVariable::Rake => self.rake,
            RoofVariable::Skylights => self.skylights,
            RoofVariable::Chimneys => self.chimneys,
            RoofVariable::PipeBoots => self.pipe_boots,
            RoofVariable::Vents => self.vents,
            RoofVariable::GutterLf => self.gutter_lf,
            RoofVariable::Downspouts => self.downspouts,
        }
    }

    fn slot(&mut self, var: RoofVariable) -> &mut f64 {
        match var {
            RoofVariable::Sq => &mut self.sq,
            RoofVariable::Sf => &mut self.sf,
            RoofVariable::P => &mut self.perimeter,
            RoofVariable::Eave => &mut self.eave,
            RoofVariable::R => &mut self.ridge,
            RoofVariable::Val => &mut self.valley,
            RoofVariable::Hip => &mut self.hip,
            RoofVariable::Rake => &mut self.rake,
            RoofVariable::Skylights => &mut self.skylights,
            RoofVariable::Chimneys => &mut self.chimneys,
            RoofVariable::PipeBoots => &mut self.pipe_boots,
            RoofVariable::Vents => &mut self.vents,
            RoofVariable::GutterLf => &mut self.gutter_lf,
            RoofVariable::Downspouts => &mut self.downspouts,
        }
    }

    /// 设置单个变量 (负值 / 非有限值拒绝)
    pub fn set(&mut self, var: RoofVariable, value: f64) -> Result<(), VariableError> {
        *self.slot(var) = check_value(var.as_str(), value)?;
        Ok(())
    }

    /// 从键值对构造
    ///
    /// # 错误
    /// - `UnknownVariable`: 键不在整体变量表内
    /// - `NegativeValue` / `NonFinite`: 取值非法
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, VariableError>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut vars = RoofVariables::default();
        for (key, value) in pairs {
            let var = RoofVariable::parse(key)
                .ok_or_else(|| VariableError::UnknownVariable(key.to_string()))?;
            vars.set(var, value)?;
        }
        Ok(vars)
    }

    /// 添加坡面
    pub fn with_slope(mut self, name: &str, slope: SlopeVariables) -> Self {
        self.slopes.insert(name.to_string(), slope);
        self
    }

    /// 校验所有取值 (反序列化后调用)
    pub fn validate(&self) -> Result<(), VariableError> {
        for var in RoofVariable::ALL {
            check_value(var.as_str(), self.get(var))?;
        }
        for slope in self.slopes.values() {
            slope.validate()?;
        }
        Ok(())
    }

    /// 展平为整体变量绑定
    pub fn bindings(&self) -> VariableBindings {
        let mut values = BTreeMap::new();
        for var in RoofVariable::ALL {
            values.insert(var.as_str(), self.get(var));
        }
        VariableBindings { values }
    }

    /// 指定坡面的变量绑定: 坡面字段覆盖同名整体字段
    pub fn bindings_for_slope(&self, slope_name: &str) -> Result<VariableBindings, VariableError> {
        let slope = self
            .slopes
            .get(slope_name)
            .ok_or_else(|| VariableError::UnknownSlope(slope_name.to_string()))?;

        let mut bindings = self.bindings();
        for var in SlopeVariable::ALL {
            bindings.values.insert(var.as_str(), slope.get(var));
        }
        Ok(bindings)
    }
}

// ==========================================
// VariableBindings - 公式求值用的扁平变量表
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableBindings {
    values: BTreeMap<&'static str, f64>,
}

impl VariableBindings {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
