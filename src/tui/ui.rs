use ratatui::{
    layout::{Constraint, Flex, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

use crate::app::{detail_text, is_read, App};

/// Feed bar and digest list on the left third; the selected digest on the
/// right. Each column ends in a one-line status row.
pub fn draw(frame: &mut Frame, app: &App) {
    let [left, right] =
        Layout::horizontal([Constraint::Ratio(1, 3), Constraint::Ratio(2, 3)]).areas(frame.area());
    let [feed_bar, list, hints] =
        Layout::vertical([Constraint::Length(3), Constraint::Min(0), Constraint::Length(1)])
            .areas(left);
    let [title, body, status] =
        Layout::vertical([Constraint::Length(3), Constraint::Min(0), Constraint::Length(1)])
            .areas(right);

    render_feed_bar(frame, app, feed_bar);
    render_digest_list(frame, app, list);
    render_key_hints(frame, app, hints);

    render_digest_title(frame, app, title);
    render_body(frame, app, body);
    render_status(frame, app, status);

    if app.show_help {
        render_help(frame);
    }
}

fn render_feed_bar(frame: &mut Frame, app: &App, area: Rect) {
    let feed = app
        .current_feed()
        .map(|f| f.title.as_str())
        .unwrap_or("No feeds");
    let title = format!(" {feed} [{}/{}] ", app.feed_index + 1, app.feeds.len().max(1));
    let stats = format!(" {} Digests | {} Unread", app.articles.len(), app.unread_count());

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    frame.render_widget(block, area);
    frame.render_widget(Paragraph::new(stats).style(Style::default().fg(Color::White)), inner);
}

fn render_digest_list(frame: &mut Frame, app: &App, area: Rect) {
    let items: Vec<ListItem> = app
        .articles
        .iter()
        .map(|article| {
            let style = if is_read(article) {
                Style::default().fg(Color::DarkGray)
            } else {
                Style::default().fg(Color::White)
            };
            let marker = match &article.digest {
                Some(d) if d.listened => "♪ ",
                Some(_) => "  ",
                None => "… ",
            };
            let title = article
                .digest
                .as_ref()
                .map(|d| d.title_str())
                .filter(|t| !t.is_empty())
                .unwrap_or(article.title.as_str());

            ListItem::new(Line::from(vec![
                Span::styled(marker, Style::default().fg(Color::Yellow)),
                Span::styled(title, style),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    let mut state = ListState::default();
    if !app.articles.is_empty() {
        state.select(Some(app.selected_index));
    }
    frame.render_stateful_widget(list, area, &mut state);
}

fn render_key_hints(frame: &mut Frame, app: &App, area: Rect) {
    let status = if app.is_refreshing {
        format!("{} Refreshing feeds...", app.spinner())
    } else {
        "j/k:nav  f:feed  p:play  r:refresh  ?:help  q:quit".to_string()
    };
    frame.render_widget(
        Paragraph::new(status).style(Style::default().fg(Color::DarkGray)),
        area,
    );
}

fn render_digest_title(frame: &mut Frame, app: &App, area: Rect) {
    let title = app
        .selected_article()
        .map(|a| match &a.digest {
            Some(d) if !d.title_str().is_empty() => d.title_str(),
            _ => a.title.as_str(),
        })
        .unwrap_or("No digest selected");

    let block = Block::default()
        .title(" Digest ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    frame.render_widget(Paragraph::new(title).block(block).wrap(Wrap { trim: true }), area);
}

fn render_body(frame: &mut Frame, app: &App, area: Rect) {
    let content = match app.selected_article() {
        Some(article) => format!("{}\n\n{}", detail_text(article), article.url),
        None => "Nothing here yet. Press r to fetch feeds.".to_string(),
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));

    frame.render_widget(Paragraph::new(content).block(block).wrap(Wrap { trim: true }), area);
}

fn render_status(frame: &mut Frame, app: &App, area: Rect) {
    let status = match (&app.playing, &app.status) {
        (Some(_), Some(status)) => format!("{} {status}", app.spinner()),
        (None, Some(status)) => status.clone(),
        _ => String::new(),
    };
    frame.render_widget(
        Paragraph::new(status).style(Style::default().fg(Color::DarkGray)),
        area,
    );
}

fn render_help(frame: &mut Frame) {
    let area = centered_rect(50, 60, frame.area());

    let help_text = [
        "",
        " Reading:",
        "   j / ↓    Move down",
        "   k / ↑    Move up",
        "   f / Tab  Next feed",
        "",
        " Digest:",
        "   Enter    Open digest (marks read)",
        "   m        Mark read",
        "   o        Open in browser",
        "   p        Play audio",
        "   r        Refresh all feeds",
        "",
        " Other:",
        "   ?        Toggle this help",
        "   q        Quit",
        "",
        " Press any key to close",
    ];

    let block = Block::default()
        .title(" Help ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let paragraph = Paragraph::new(help_text.join("\n"))
        .block(block)
        .style(Style::default().fg(Color::White));

    frame.render_widget(Clear, area);
    frame.render_widget(paragraph, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let [area] = Layout::vertical([Constraint::Percentage(percent_y)])
        .flex(Flex::Center)
        .areas(area);
    let [area] = Layout::horizontal([Constraint::Percentage(percent_x)])
        .flex(Flex::Center)
        .areas(area);
    area
}
