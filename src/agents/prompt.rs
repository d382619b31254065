// Prompt templates for the SQL agent

pub const TOOL_LIST_TABLES: &str = "sql_db_list_tables";
pub const TOOL_SCHEMA: &str = "sql_db_schema";
pub const TOOL_QUERY: &str = "sql_db_query";
pub const TOOL_QUERY_CHECKER: &str = "sql_db_query_checker";

pub const TOOL_NAMES: [&str; 4] = [TOOL_QUERY, TOOL_SCHEMA, TOOL_LIST_TABLES, TOOL_QUERY_CHECKER];

/// Text the model emits after an action; generation stops here so we can run the tool
pub const OBSERVATION_STOP: &str = "\nObservation:";

fn tool_descriptions() -> String {
    [
        (
            TOOL_QUERY,
            "Input is a detailed and correct SQL query, output is a result from the database. \
             If the query is not correct, an error message is returned. If an error is returned, \
             rewrite the query, check it, and try again. If you see an unknown column error, use \
             sql_db_schema to look up the correct table fields.",
        ),
        (
            TOOL_SCHEMA,
            "Input is a comma-separated list of tables, output is the schema and sample rows for \
             those tables. Make sure the tables exist by calling sql_db_list_tables first. \
             Example Input: table1, table2",
        ),
        (
            TOOL_LIST_TABLES,
            "Input is an empty string, output is a comma-separated list of tables in the database.",
        ),
        (
            TOOL_QUERY_CHECKER,
            "Use this tool to check that a query is correct before executing it. Always use this \
             tool before running a query with sql_db_query.",
        ),
    ]
    .iter()
    .map(|(name, description)| format!("{}: {}", name, description))
    .collect::<Vec<_>>()
    .join("\n")
}

pub fn create_agent_prompt(dialect: &str, top_k: usize, question: &str, scratchpad: &str) -> String {
    format!(
        "You are an agent that answers questions about a {dialect} database.\n\
         Given an input question, write a syntactically correct {dialect} query, run it, look at \
         the results and return the answer.\n\
         Unless the question asks for a specific number of examples, limit your query to at most \
         {top_k} results. Order results by a relevant column to surface the most useful rows.\n\
         Never select every column of a table; ask only for the columns relevant to the question.\n\
         Only use the tools below, and only use the information they return to build the final answer.\n\
         Check your query before executing it. If a query fails, rewrite it and try again.\n\n\
         Do NOT issue data-changing statements (INSERT, UPDATE, DELETE, DROP etc.); the database is read-only.\n\n\
         If the question does not seem related to the database, answer \"I don't know\".\n\n\
         {tools}\n\n\
         Use the following format:\n\n\
         Question: the input question you must answer\n\
         Thought: what you should do next\n\
         Action: the action to take, one of [{tool_names}]\n\
         Action Input: the input to the action\n\
         Observation: the result of the action\n\
         ... (Thought/Action/Action Input/Observation can repeat)\n\
         Thought: I now know the final answer\n\
         Final Answer: the final answer to the original input question\n\n\
         Begin!\n\n\
         Question: {question}\n\
         Thought: I should look at the tables in the database to see what I can query. Then I \
         should query the schema of the most relevant tables.\n\
         {scratchpad}",
        dialect = dialect,
        top_k = top_k,
        tools = tool_descriptions(),
        tool_names = TOOL_NAMES.join(", "),
        question = question,
        scratchpad = scratchpad,
    )
}

pub fn create_query_check_prompt(dialect: &str, query: &str) -> String {
    format!(
        "{query}\n\
         Double check the {dialect} query above for common mistakes, including:\n\
         - Using NOT IN with NULL values\n\
         - Using UNION when UNION ALL should have been used\n\
         - Using BETWEEN for exclusive ranges\n\
         - Data type mismatch in predicates\n\
         - Properly quoting identifiers\n\
         - Using the correct number of arguments for functions\n\
         - Casting to the correct data type\n\
         - Using the proper columns for joins\n\n\
         If there are any of the above mistakes, rewrite the query. If there are no mistakes, \
         just reproduce the original query.\n\n\
         Output the final SQL query only.\n\n\
         SQL Query: ",
        query = query,
        dialect = dialect,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_prompt_mentions_every_tool() {
        let prompt = create_agent_prompt("sqlite", 10, "how many rows are there", "");
        for tool in TOOL_NAMES {
            assert!(prompt.contains(tool));
        }
        assert!(prompt.contains("Question: how many rows are there"));
        assert!(prompt.contains("at most 10 results"));
    }
}
