use std::fmt;
use std::sync::Arc;

use billing_domain::{TaskProcessor, TaskType};

/// 任务类型到处理器的不可变映射
///
/// 以 `TaskType` 为下标的定长表，构造完成后不再变化。
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: [Option<Arc<dyn TaskProcessor>>; TaskType::COUNT],
}

impl ProcessorRegistry {
    pub fn builder() -> ProcessorRegistryBuilder {
        ProcessorRegistryBuilder::default()
    }

    /// 为每个任务类型都提供处理器
    pub fn exhaustive<F>(mut factory: F) -> Self
    where
        F: FnMut(TaskType) -> Arc<dyn TaskProcessor>,
    {
        let mut builder = Self::builder();
        for task_type in TaskType::ALL {
            builder = builder.register(task_type, factory(task_type));
        }
        builder.build()
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskProcessor>> {
        self.processors[task_type.index()].clone()
    }

    pub fn registered_types(&self) -> Vec<TaskType> {
        TaskType::ALL
            .into_iter()
            .filter(|task_type| self.processors[task_type.index()].is_some())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.processors.iter().all(Option::is_some)
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for task_type in TaskType::ALL {
            if let Some(processor) = &self.processors[task_type.index()] {
                map.entry(&task_type.as_str(), &processor.name());
            }
        }
        map.finish()
    }
}

#[derive(Default)]
pub struct ProcessorRegistryBuilder {
    processors: [Option<Arc<dyn TaskProcessor>>; TaskType::COUNT],
}

impl ProcessorRegistryBuilder {
    /// 同一类型重复注册时以后者为准
    pub fn register(mut self, task_type: TaskType, processor: Arc<dyn TaskProcessor>) -> Self {
        self.processors[task_type.index()] = Some(processor);
        self
    }

    pub fn build(self) -> ProcessorRegistry {
        ProcessorRegistry {
            processors: self.processors,
        }
    }
}
