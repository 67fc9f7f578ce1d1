//! Tool descriptors → model function declarations.

use switchboard_core::model::FunctionDeclaration;
use switchboard_core::schema::ToolDescriptor;

pub fn declaration(descriptor: &ToolDescriptor) -> FunctionDeclaration {
    FunctionDeclaration {
        name: descriptor.name.clone(),
        description: descriptor.description.clone(),
        parameters: descriptor.json_schema(),
    }
}

/// Order is preserved.
pub fn declarations(descriptors: &[ToolDescriptor]) -> Vec<FunctionDeclaration> {
    descriptors.iter().map(declaration).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchboard_core::schema::ParamSpec;

    #[test]
    fn renders_json_schema_parameters() {
        let descriptor = ToolDescriptor::new("list_orders", "List orders")
            .param(ParamSpec::string("customer_id").required())
            .param(ParamSpec::integer("limit").with_default(json!(10)));

        let decl = declaration(&descriptor);
        assert_eq!(decl.name, "list_orders");
        assert_eq!(decl.description, "List orders");
        assert_eq!(decl.parameters["type"], "object");
        assert_eq!(decl.parameters["required"], json!(["customer_id"]));
        assert_eq!(decl.parameters["properties"]["limit"]["type"], "integer");
    }

    #[test]
    fn keeps_order() {
        let tools = vec![
            ToolDescriptor::new("b", "second letter"),
            ToolDescriptor::new("a", "first letter"),
        ];
        let names: Vec<_> = declarations(&tools).into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
