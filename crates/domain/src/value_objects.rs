use serde::{Deserialize, Serialize};

/// 部分更新中单个可空字段的操作
///
/// - `Set(T)`: 设为指定值
/// - `Unset`: 置空
/// - `NoChange`: 保持不变
#[derive(Debug, Clone, PartialEq, Default)]
pub enum UpdateValue<T> {
    Set(T),
    Unset,
    #[default]
    NoChange,
}

impl<T> UpdateValue<T> {
    pub fn is_change(&self) -> bool {
        !matches!(self, UpdateValue::NoChange)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            UpdateValue::Set(value) => Some(value),
            _ => None,
        }
    }

    /// 应用到已有值上
    pub fn apply_to(self, existing: Option<T>) -> Option<T> {
        match self {
            UpdateValue::Set(value) => Some(value),
            UpdateValue::Unset => None,
            UpdateValue::NoChange => existing,
        }
    }
}

impl<T> From<Option<T>> for UpdateValue<T> {
    /// `None` 表示置空
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => UpdateValue::Set(value),
            None => UpdateValue::Unset,
        }
    }
}

/// 资格核查结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityOutcome {
    pub eligible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// 处理器的成功产出，按任务类型区分
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskOutput {
    Eligibility(EligibilityOutcome),
    #[serde(rename_all = "camelCase")]
    ClaimCreated { claim_id: String },
    #[serde(rename_all = "camelCase")]
    EdiGenerated {
        claim_id: String,
        control_number: String,
        #[serde(default)]
        segment_count: u32,
    },
    #[serde(rename_all = "camelCase")]
    ClaimSubmitted {
        claim_id: String,
        submission_id: String,
    },
    #[serde(rename_all = "camelCase")]
    StatusChecked {
        claim_id: String,
        claim_status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AppealFiled { claim_id: String, appeal_id: String },
    /// 结构不固定的产出
    Raw(serde_json::Value),
}

impl TaskOutput {
    pub fn raw(value: serde_json::Value) -> Self {
        TaskOutput::Raw(value)
    }

    /// 序列化失败时返回描述错误的载荷，而不是丢弃结果
    pub fn to_json_or_fallback(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "error": "result serialization failed",
                "detail": e.to_string(),
            })
        })
    }
}
