use serde::{Deserialize, Serialize};

/// 默认每页条数
pub const DEFAULT_PAGE_SIZE: u32 = 20;
/// 每页最大条数
pub const MAX_PAGE_SIZE: u32 = 100;

/// 分页参数（页码从 1 开始）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    /// 规范化分页参数：页码至少为 1，页大小超出范围时回落到默认值
    pub fn new(page: u32, page_size: u32) -> Self {
        let page = page.max(1);
        let page_size = if page_size == 0 || page_size > MAX_PAGE_SIZE {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        Self { page, page_size }
    }

    pub fn limit(&self) -> i64 {
        self.page_size as i64
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.page_size as i64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

/// 分页结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

/// 主操作成功但附带次要告警（审计/流水写入失败）的返回值
///
/// 审计与流水写入失败不会回滚主操作，失败信息放在 `warnings` 中交给调用方。
#[derive(Debug, Clone)]
pub struct WithWarnings<T> {
    pub value: T,
    pub warnings: Vec<String>,
}

impl<T> WithWarnings<T> {
    pub fn new(value: T, warnings: Vec<String>) -> Self {
        Self { value, warnings }
    }

    pub fn clean(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn into_value(self) -> T {
        self.value
    }
}
