//! Prompt composition for agent sessions.
//!
//! The supervisor treats every composed prompt as an opaque string; this
//! module is the single place that knows the task-file and marker-file
//! contract the agent is asked to follow.

use crate::domain::project::Project;
use crate::domain::task::format_task_number;

fn project_preamble(project: &Project) -> String {
  let mut s = format!(
    "You are working inside the project \"{}\". Task files live in \
     .foreman/tasks/ and are YAML documents.",
    project.name,
  );
  if !project.definition.is_empty() {
    s.push_str("\n\nProject definition:\n");
    s.push_str(&project.definition);
  }
  s
}

pub fn compose_chat_prompt(project: &Project) -> String {
  project_preamble(project)
}

pub fn compose_task_system_prompt(
  project: &Project,
  task_number: u32,
  title: &str,
  prompt: &str,
  acceptance_criteria: &str,
) -> String {
  let padded = format_task_number(task_number);
  let mut s = project_preamble(project);
  s.push_str(&format!(
    "\n\nYou are implementing task #{padded}: {title}\n\n{prompt}\n",
  ));
  if !acceptance_criteria.is_empty() {
    s.push_str(&format!("\nAcceptance criteria:\n{acceptance_criteria}\n"));
  }
  s.push_str(&format!(
    "\nWhen the task is complete, edit .foreman/tasks/{padded}.yaml: set \
     `status: done` and `success: true` (or `success: false` with a \
     `failure_reason`). The supervisor stops this session once the file is \
     updated.",
  ));
  s
}

pub fn compose_task_user_prompt(task_number: u32, title: &str) -> String {
  format!("Implement Task #{}: {}", format_task_number(task_number), title)
}

pub fn compose_refine_system_prompt(
  project: &Project,
  task_number: u32,
  title: &str,
  prompt: &str,
  acceptance_criteria: &str,
) -> String {
  let padded = format_task_number(task_number);
  let mut s = project_preamble(project);
  s.push_str(&format!(
    "\n\nRefine draft task #{padded}: {title}\n\nCurrent prompt:\n{prompt}\n",
  ));
  if !acceptance_criteria.is_empty() {
    s.push_str(&format!("\nCurrent acceptance criteria:\n{acceptance_criteria}\n"));
  }
  s.push_str(&format!(
    "\nRewrite the prompt and acceptance criteria in \
     .foreman/tasks/{padded}.yaml until the task is actionable, then set \
     `status: ready`. When refinement is finished, write the file \
     .foreman/refine_done.yaml to signal the next phase.",
  ));
  s
}

pub fn compose_refine_user_prompt(task_number: u32, title: &str) -> String {
  format!("Refine Task #{}: {}", format_task_number(task_number), title)
}

pub fn compose_generate_system_prompt(project: &Project) -> String {
  let mut s = project_preamble(project);
  s.push_str(
    "\n\nReview the project state and author new draft tasks as \
     .foreman/tasks/NNNN.yaml files (zero-padded, next free number, \
     `status: draft`). If no further work is warranted, create no tasks. \
     Either way, write .foreman/generate_done.yaml when you are finished.",
  );
  s
}

pub fn compose_generate_user_prompt() -> String {
  "Generate the next round of draft tasks, or signal completion.".to_string()
}

pub fn compose_definition_system_prompt(project: &Project) -> String {
  let mut s = project_preamble(project);
  s.push_str(
    "\n\nExplore the repository and write a concise project definition into \
     the `definition` field of .foreman/project.yaml. When done, write \
     .foreman/definition_done.yaml.",
  );
  s
}

pub fn compose_definition_user_prompt() -> String {
  "Write the project definition.".to_string()
}

pub fn compose_tasks_system_prompt(project: &Project) -> String {
  let mut s = project_preamble(project);
  s.push_str(
    "\n\nBreak the project definition down into an initial set of draft task \
     files under .foreman/tasks/. When done, write .foreman/tasks_done.yaml.",
  );
  s
}

pub fn compose_tasks_user_prompt() -> String {
  "Generate the initial task breakdown.".to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn task_prompt_names_file_and_number() {
    let project = Project::new("pid", "demo");
    let s = compose_task_system_prompt(&project, 7, "Add parser", "Parse input", "");
    assert!(s.contains("#0007"));
    assert!(s.contains(".foreman/tasks/0007.yaml"));
    assert!(s.contains("status: done"));
    assert_eq!(compose_task_user_prompt(7, "Add parser"), "Implement Task #0007: Add parser");
  }

  #[test]
  fn phase_prompts_name_their_marker_files() {
    let project = Project::new("pid", "demo");
    assert!(compose_refine_system_prompt(&project, 1, "t", "p", "").contains("refine_done.yaml"));
    assert!(compose_generate_system_prompt(&project).contains("generate_done.yaml"));
    assert!(compose_definition_system_prompt(&project).contains("definition_done.yaml"));
    assert!(compose_tasks_system_prompt(&project).contains("tasks_done.yaml"));
  }

  #[test]
  fn definition_is_included_when_present() {
    let mut project = Project::new("pid", "demo");
    assert!(!compose_chat_prompt(&project).contains("Project definition"));
    project.definition = "A CLI for frobnicating.".into();
    assert!(compose_chat_prompt(&project).contains("A CLI for frobnicating."));
  }
}
