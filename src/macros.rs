// Macro for creating Arrow schema fields
macro_rules! field {
    ($name:expr, $data_type:expr) => {
        Field::new($name, $data_type, true)
    };
    ($name:expr, $data_type:expr, $nullable:expr) => {
        Field::new($name, $data_type, $nullable)
    };
}

// Macro for creating schemas with less boilerplate
macro_rules! schema {
    ($($name:expr => $data_type:expr $(, $nullable:expr)?);* $(;)?) => {
        Schema::new(vec![
            $(field!($name, $data_type $(, $nullable)?),)*
        ])
    };
}

// Macro for creating string arrays from record fields
macro_rules! string_array_required {
    ($records:expr, $field:ident) => {
        Arc::new(StringArray::from_iter_values(
            $records.iter().map(|r| &r.$field),
        ))
    };
}

// Macro for creating optional string arrays
macro_rules! string_array_optional {
    ($records:expr, $field:ident) => {
        Arc::new(StringArray::from_iter(
            $records.iter().map(|r| r.$field.as_deref()),
        ))
    };
}

// Macro for creating int32 arrays
macro_rules! int32_array {
    ($records:expr, $field:ident) => {
        Arc::new(Int32Array::from_iter_values(
            $records.iter().map(|r| r.$field),
        ))
    };
}

// Macro for creating numeric arrays
macro_rules! int64_array {
    ($records:expr, $field:ident) => {
        Arc::new(Int64Array::from_iter_values(
            $records.iter().map(|r| r.$field as i64),
        ))
    };
}

// Macro for creating float arrays
macro_rules! float64_array {
    ($records:expr, $field:ident) => {
        Arc::new(Float64Array::from_iter_values(
            $records.iter().map(|r| r.$field),
        ))
    };
}

// Macro for creating record batches with less boilerplate
macro_rules! batch_of {
    ($schema:expr, $($array:expr),* $(,)?) => {
        RecordBatch::try_new(Arc::new($schema), vec![$($array as ArrayRef,)*])
    };
}

// Macro for extracting text fields from an XML tree node
macro_rules! extract_string {
    ($node:expr, $field:expr) => {
        $node
            .get($field)
            .and_then($crate::xml::text_of)
            .map(|s| s.to_string())
    };
}

// Macro for extracting nested text fields from an XML tree node
macro_rules! extract_nested_string {
    ($node:expr, $outer_field:expr, $inner_field:expr) => {
        $node
            .get($outer_field)
            .and_then(|v| v.get($inner_field))
            .and_then($crate::xml::text_of)
            .map(|s| s.to_string())
    };
}

// Macro for progress bars shared by every stage
macro_rules! stage_progress {
    ($len:expr, $unit:expr, $message:expr) => {{
        let progress = ProgressBar::new($len as u64);
        progress.set_style(ProgressStyle::with_template(&format!(
            "[{{elapsed_precise}}] {{bar:50.cyan/blue}} {{pos:>7}}/{{len:7}} {} | {{msg}}",
            $unit
        ))?);
        progress.set_message($message);
        progress
    }};
}
