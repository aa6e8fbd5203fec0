use crate::store::types::ChannelType;

const OPENAI_FAMILY: &[ChannelType] = &[ChannelType::OpenAI, ChannelType::OpenAICompatible];
const ANTHROPIC_FAMILY: &[ChannelType] = &[ChannelType::Anthropic];
const GEMINI_FAMILY: &[ChannelType] = &[ChannelType::Gemini];

/// 固定模型表：模型前缀 → 支持的渠道类型。闭集，无注册机制。
pub const MODEL_TABLE: &[(&str, &[ChannelType])] = &[
    ("gpt-4", OPENAI_FAMILY),
    ("gpt-4-turbo", OPENAI_FAMILY),
    ("gpt-4o", OPENAI_FAMILY),
    ("gpt-4o-mini", OPENAI_FAMILY),
    ("gpt-3.5-turbo", OPENAI_FAMILY),
    ("o1", OPENAI_FAMILY),
    ("o1-mini", OPENAI_FAMILY),
    ("o1-preview", OPENAI_FAMILY),
    ("claude-3-opus", ANTHROPIC_FAMILY),
    ("claude-3-sonnet", ANTHROPIC_FAMILY),
    ("claude-3-haiku", ANTHROPIC_FAMILY),
    ("claude-3.5-sonnet", ANTHROPIC_FAMILY),
    ("claude-3-5-sonnet", ANTHROPIC_FAMILY),
    ("gemini-pro", GEMINI_FAMILY),
    ("gemini-1.5-pro", GEMINI_FAMILY),
    ("gemini-1.5-flash", GEMINI_FAMILY),
];

/// 最长前缀匹配；无命中时按 openai 家族处理
pub fn resolve_types(model: &str) -> &'static [ChannelType] {
    let mut best: Option<(&str, &'static [ChannelType])> = None;
    for (prefix, types) in MODEL_TABLE {
        if model.starts_with(prefix)
            && best.is_none_or(|(current, _)| prefix.len() > current.len())
        {
            best = Some((prefix, types));
        }
    }
    best.map(|(_, types)| types).unwrap_or(OPENAI_FAMILY)
}

pub fn supports(model: &str, channel_type: ChannelType) -> bool {
    resolve_types(model).contains(&channel_type)
}
