//! Built-in Handlebars templates.

/// Instructions injected for a task.
pub const TASK: &str = r#"# Task {{task.id}}: {{task.name}}
{{#if feature}}
Feature: {{feature}}
{{/if}}
Priority: {{task.priority}}
Attempt: {{attempt}} of {{max_attempts}}

## What to do

{{#if task.description}}{{task.description}}{{else}}{{task.name}}{{/if}}
{{#if task.exclusive_files}}

## Files you own

{{#each task.exclusive_files}}
- {{this}}
{{/each}}
{{/if}}
{{#if feedback}}

## Previous attempt

{{feedback}}
{{/if}}

## Reporting

Work only inside this directory. When you stop, end your reply with:

---HERMES_STATUS---
STATUS: IN_PROGRESS | COMPLETE | BLOCKED
EXIT_SIGNAL: true | false
WORK_TYPE: IMPLEMENTATION | TESTING | DOCUMENTATION | REFACTORING
RECOMMENDATION: <one line for the next step>
---END_HERMES_STATUS---
"#;

/// Three-way merge of one file.
pub const MERGE: &str = r#"You are merging parallel changes to `{{file}}`.

## Original file

```
{{original}}
```

## Change A ({{a.task_id}})

Intent: {{a.intent}}

```diff
{{a.diff}}
```

## Change B ({{b.task_id}})

Intent: {{b.intent}}

```diff
{{b.diff}}
```

Produce the complete merged file that keeps the intent of both changes.
Do not leave conflict markers. Reply in exactly this format:

MERGED_CODE_START
<complete merged file>
MERGED_CODE_END
EXPLANATION: <one line>
CONFIDENCE: <0.0 - 1.0>
"#;

/// Semantic conflict review of one file.
pub const SEMANTIC: &str = r#"Several tasks changed `{{file}}` independently. Their edits merge
cleanly as text. Decide whether they still conflict in meaning (one relies
on behaviour the other changes or removes).

{{#each changes}}
## {{task_id}}

Intent: {{intent}}

```diff
{{diff}}
```

{{/each}}
Reply in exactly this format:

SEMANTIC_CONFLICT: yes | no
SEVERITY: low | medium | high
DESCRIPTION: <one line>
SUGGESTION: <one line>
"#;
