//! Built-in item type names and the property names their behaviors read.

pub const SCHEMA_ITEM: &str = "SchemaItem";

pub const DATA_ENTITY: &str = "DataEntity";
pub const DATA_ENTITY_COLUMN: &str = "DataEntityColumn";
pub const DETACHED_FIELD: &str = "DetachedField";
pub const ENTITY_UI_ACTION: &str = "EntityUIAction";
pub const DATA_STRUCTURE: &str = "DataStructure";
pub const DATA_FILTER: &str = "DataFilter";

pub const FUNCTION: &str = "Function";
pub const FUNCTION_PARAMETER: &str = "FunctionParameter";
pub const FUNCTION_CALL: &str = "FunctionCall";
pub const FUNCTION_CALL_PARAMETER: &str = "FunctionCallParameter";

pub const WORKFLOW: &str = "Workflow";
pub const WORKFLOW_BLOCK: &str = "WorkflowBlock";
pub const WORKFLOW_STEP: &str = "WorkflowStep";
pub const WORKFLOW_TASK: &str = "WorkflowTask";
pub const WORKFLOW_TASK_DEPENDENCY: &str = "WorkflowTaskDependency";

pub const WORK_QUEUE_CLASS: &str = "WorkQueueClass";

pub const SCREEN_SECTION: &str = "ScreenSection";
pub const SCREEN_SECTION_CONDITION: &str = "ScreenSectionCondition";

pub const XSL_TRANSFORMATION: &str = "XslTransformation";
pub const XSL_RULE: &str = "XslRule";
pub const XPATH_RULE: &str = "XPathRule";
pub const CONTEXT_STORE: &str = "ContextStore";

/// Workflow node kinds a step may be moved into
pub const WORKFLOW_BLOCK_TYPES: &[&str] = &[WORKFLOW, WORKFLOW_BLOCK];

/// Property names used inside `SchemaItemRecord::properties`
pub mod props {
    pub const TEXT_STORE: &str = "textStore";
    pub const XSL: &str = "xsl";
    pub const XPATH: &str = "xpath";

    pub const CONFIRMATION_RULE_ID: &str = "confirmationRuleId";
    pub const FUNCTION_PARAMETER_ID: &str = "functionParameterId";
    pub const FUNCTION_ID: &str = "functionId";

    pub const START_CONDITION_RULE_ID: &str = "startConditionRuleId";
    pub const START_CONDITION_RULE_CONTEXT_STORE_ID: &str = "startConditionRuleContextStoreId";
    pub const VALIDATION_RULE_ID: &str = "validationRuleId";
    pub const VALIDATION_RULE_CONTEXT_STORE_ID: &str = "validationRuleContextStoreId";
    pub const TASK_ID: &str = "taskId";

    pub const ENTITY_ID: &str = "entityId";
    pub const ENTITY_STRUCTURE_ID: &str = "entityStructureId";
    pub const CONDITION_FILTER_ID: &str = "conditionFilterId";
    pub const WORK_QUEUE_STRUCTURE_ID: &str = "workQueueStructureId";
    pub const NOTIFICATION_STRUCTURE_ID: &str = "notificationStructureId";

    pub const SCREEN_SECTION_ID: &str = "screenSectionId";
    pub const CAPTION: &str = "caption";
}
